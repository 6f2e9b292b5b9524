//! Item Sources
//!
//! Items come from exactly one of:
//!
//! - an inline comma separated list,
//! - a file with one item name per line,
//! - a multi domain file with one `<domain code>|<item>` per line.
//!
//! Blank lines are ignored everywhere. Malformed multi domain lines are
//! skipped with a warning.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use super::settings::{ConfigError, split_list};
use crate::domain::subscription::ItemSpec;

/// Name of a numeric RDM domain code; unknown codes stay numeric.
#[must_use]
pub fn domain_name(code: u32) -> Cow<'static, str> {
    let name = match code {
        1 => "Login",
        4 => "Source",
        5 => "Dictionary",
        6 => "MarketPrice",
        7 => "MarketByOrder",
        8 => "MarketByPrice",
        9 => "MarketMaker",
        10 => "SymbolList",
        other => return Cow::Owned(other.to_string()),
    };
    Cow::Borrowed(name)
}

/// Where the requested items come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemSource {
    /// Comma separated list.
    Inline(String),
    /// One item name per line.
    File(PathBuf),
    /// One `<domain code>|<item>` per line.
    DomainFile(PathBuf),
}

impl ItemSource {
    /// Pick the single configured source.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NoItemSource`] if none is given,
    /// [`ConfigError::MultipleItemSources`] if more than one is.
    pub fn from_options(
        inline: Option<String>,
        file: Option<PathBuf>,
        domain_file: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let mut sources = [
            inline.map(Self::Inline),
            file.map(Self::File),
            domain_file.map(Self::DomainFile),
        ]
        .into_iter()
        .flatten();

        let source = sources.next().ok_or(ConfigError::NoItemSource)?;
        if sources.next().is_some() {
            return Err(ConfigError::MultipleItemSources);
        }
        Ok(source)
    }

    /// Load the items; `domain` tags inline and plain file items.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ItemFile`] if a file cannot be read.
    pub fn load(&self, domain: Option<&str>) -> Result<Vec<ItemSpec>, ConfigError> {
        match self {
            Self::Inline(list) => Ok(parse_inline(list, domain)),
            Self::File(path) => Ok(parse_plain(&read(path)?, domain)),
            Self::DomainFile(path) => Ok(parse_domain_tagged(&read(path)?)),
        }
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::ItemFile {
        path: path.to_path_buf(),
        source,
    })
}

fn tagged(domain: Option<&str>, name: &str) -> ItemSpec {
    ItemSpec::new(domain.map(str::to_string), name)
}

/// Items from a comma separated list.
#[must_use]
pub fn parse_inline(list: &str, domain: Option<&str>) -> Vec<ItemSpec> {
    split_list(list).map(|name| tagged(domain, name)).collect()
}

/// Items from one-per-line text.
#[must_use]
pub fn parse_plain(text: &str, domain: Option<&str>) -> Vec<ItemSpec> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|name| tagged(domain, name))
        .collect()
}

/// Items from `<domain code>|<item>` lines.
#[must_use]
pub fn parse_domain_tagged(text: &str) -> Vec<ItemSpec> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| {
            let parsed = parse_domain_line(line);
            if parsed.is_none() {
                tracing::warn!(line = index + 1, content = line, "Skipping malformed item line");
            }
            parsed
        })
        .collect()
}

fn parse_domain_line(line: &str) -> Option<ItemSpec> {
    let (code, name) = line.split_once('|')?;
    let code = code.trim().parse::<u32>().ok()?;
    let name = name.trim();
    if name.is_empty() || name.contains('|') {
        return None;
    }
    Some(ItemSpec::new(Some(domain_name(code).into_owned()), name))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn known_and_unknown_domain_codes() {
        assert_eq!(domain_name(6), "MarketPrice");
        assert_eq!(domain_name(8), "MarketByPrice");
        assert_eq!(domain_name(10), "SymbolList");
        assert_eq!(domain_name(27), "27");
    }

    #[test]
    fn inline_list_trims_and_tags() {
        let items = parse_inline(" VOD.L, BT.L ,,", Some("MarketByOrder"));
        assert_eq!(
            items,
            vec![
                ItemSpec::new(Some("MarketByOrder".into()), "VOD.L"),
                ItemSpec::new(Some("MarketByOrder".into()), "BT.L"),
            ]
        );
    }

    #[test]
    fn plain_text_skips_blank_lines() {
        let items = parse_plain("VOD.L\n\n  BT.L  \n", None);
        assert_eq!(
            items,
            vec![ItemSpec::untagged("VOD.L"), ItemSpec::untagged("BT.L")]
        );
    }

    #[test]
    fn domain_tagged_lines() {
        let text = "6|VOD.L\n8|BT.L\nnot-a-line\nx|BAD\n7|\n\n99|ODD.L\n";
        let items = parse_domain_tagged(text);
        assert_eq!(
            items,
            vec![
                ItemSpec::new(Some("MarketPrice".into()), "VOD.L"),
                ItemSpec::new(Some("MarketByPrice".into()), "BT.L"),
                ItemSpec::new(Some("99".into()), "ODD.L"),
            ]
        );
    }

    #[test]
    fn source_selection() {
        assert_eq!(
            ItemSource::from_options(Some("A".into()), None, None).unwrap(),
            ItemSource::Inline("A".into())
        );
        assert!(matches!(
            ItemSource::from_options(None, None, None),
            Err(ConfigError::NoItemSource)
        ));
        assert!(matches!(
            ItemSource::from_options(None, Some("a".into()), Some("b".into())),
            Err(ConfigError::MultipleItemSources)
        ));
    }

    #[test]
    fn loads_files() {
        let mut plain = tempfile::NamedTempFile::new().unwrap();
        writeln!(plain, "VOD.L\nBT.L").unwrap();
        let items = ItemSource::File(plain.path().to_path_buf())
            .load(Some("MarketPrice"))
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].domain.as_deref(), Some("MarketPrice"));

        let mut tagged = tempfile::NamedTempFile::new().unwrap();
        writeln!(tagged, "7|VOD.L").unwrap();
        // The shared domain does not override per-line domains.
        let items = ItemSource::DomainFile(tagged.path().to_path_buf())
            .load(Some("MarketPrice"))
            .unwrap();
        assert_eq!(items[0].domain.as_deref(), Some("MarketByOrder"));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.txt");
        let err = ItemSource::File(path.clone()).load(None).unwrap_err();
        assert!(matches!(err, ConfigError::ItemFile { path: p, .. } if p == path));
    }
}
