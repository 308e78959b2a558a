use camino::Utf8PathBuf;

use crate::file::File;

/// The resolved input of a mutation run: every project file, plus which of
/// them are marked for mutation.
#[derive(Debug, Clone)]
pub struct InputFiles {
    pub files: Vec<File>,
    pub mutate_file_names: Vec<Utf8PathBuf>,
}

impl InputFiles {
    /// Mutate names that do not correspond to a resolved file are dropped.
    pub fn new(files: Vec<File>, mutate_file_names: Vec<Utf8PathBuf>) -> InputFiles {
        let mutate_file_names = mutate_file_names
            .into_iter()
            .filter(|name| files.iter().any(|file| file.name() == name))
            .collect();
        InputFiles {
            files,
            mutate_file_names,
        }
    }

    pub fn files_to_mutate(&self) -> impl Iterator<Item = &File> {
        self.files
            .iter()
            .filter(|file| self.mutate_file_names.iter().any(|name| name == file.name()))
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn log_summary(&self) {
        if self.mutate_file_names.is_empty() {
            tracing::warn!(
                "No files marked to be mutated, this will be a dry-run without actually mutating anything."
            );
        } else {
            tracing::info!(
                "Found {} of {} file(s) to be mutated.",
                self.mutate_file_names.len(),
                self.files.len()
            );
        }
        tracing::debug!(
            all_files = ?self.files.iter().map(File::name).collect::<Vec<_>>(),
            files_to_mutate = ?self.mutate_file_names,
            "resolved input files"
        );
    }
}

/// Read-notification hooks fired while input files are resolved.
pub trait Reporter: Send {
    fn on_source_file_read(&mut self, _file: &File) {}
    fn on_all_source_files_read(&mut self, _files: &[File]) {}
}

/// Reporter that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {}

/// One entry of an ordered include/exclude pattern chain. A leading `!`
/// marks the pattern as negated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternEntry {
    pub negated: bool,
    pub pattern: String,
}

impl PatternEntry {
    pub fn parse(raw: &str) -> PatternEntry {
        match raw.strip_prefix('!') {
            Some(pattern) => PatternEntry {
                negated: true,
                pattern: pattern.to_string(),
            },
            None => PatternEntry {
                negated: false,
                pattern: raw.to_string(),
            },
        }
    }
}

/// Fold an ordered pattern chain into the final name set. `expand` maps a
/// pattern to the names it matches (glob or otherwise; expansion is the
/// caller's concern). A negated entry removes its matches from the
/// accumulated set; a non-negated entry appends matches not already
/// present. Leading negated entries therefore resolve to the empty set.
pub fn resolve_patterns<F>(entries: &[PatternEntry], mut expand: F) -> Vec<String>
where
    F: FnMut(&str) -> Vec<String>,
{
    let mut resolved: Vec<String> = Vec::new();
    for entry in entries {
        let matches = expand(&entry.pattern);
        if entry.negated {
            resolved.retain(|name| !matches.contains(name));
        } else {
            for name in matches {
                if !resolved.contains(&name) {
                    resolved.push(name);
                }
            }
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutate_names_without_a_matching_file_are_dropped() {
        let input = InputFiles::new(
            vec![
                File::from_text("src/a.rs", ""),
                File::from_text("src/b.rs", ""),
            ],
            vec!["src/a.rs".into(), "src/missing.rs".into()],
        );

        assert_eq!(input.mutate_file_names, vec![Utf8PathBuf::from("src/a.rs")]);
        let to_mutate: Vec<_> = input.files_to_mutate().map(|f| f.name()).collect();
        assert_eq!(to_mutate.len(), 1);
        assert_eq!(to_mutate[0], "src/a.rs");
    }

    #[test]
    fn parse_recognizes_negation() {
        assert_eq!(
            PatternEntry::parse("!**/*.spec.js"),
            PatternEntry {
                negated: true,
                pattern: "**/*.spec.js".to_string()
            }
        );
        assert_eq!(
            PatternEntry::parse("src/**"),
            PatternEntry {
                negated: false,
                pattern: "src/**".to_string()
            }
        );
    }

    fn expand_fixture(pattern: &str) -> Vec<String> {
        match pattern {
            "all" => vec!["a".into(), "b".into(), "c".into()],
            "b-only" => vec!["b".into()],
            "b-and-d" => vec!["b".into(), "d".into()],
            _ => Vec::new(),
        }
    }

    #[test]
    fn fold_adds_then_removes_in_order() {
        let entries = vec![
            PatternEntry::parse("all"),
            PatternEntry::parse("!b-only"),
        ];
        let resolved = resolve_patterns(&entries, expand_fixture);
        assert_eq!(resolved, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn fold_does_not_duplicate_existing_matches() {
        let entries = vec![
            PatternEntry::parse("all"),
            PatternEntry::parse("b-and-d"),
        ];
        let resolved = resolve_patterns(&entries, expand_fixture);
        assert_eq!(
            resolved,
            vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()]
        );
    }

    #[test]
    fn leading_negated_entry_resolves_to_empty() {
        let entries = vec![PatternEntry::parse("!all")];
        assert!(resolve_patterns(&entries, expand_fixture).is_empty());
    }

    #[test]
    fn removed_names_can_be_re_added_later() {
        let entries = vec![
            PatternEntry::parse("all"),
            PatternEntry::parse("!b-only"),
            PatternEntry::parse("b-and-d"),
        ];
        let resolved = resolve_patterns(&entries, expand_fixture);
        assert_eq!(
            resolved,
            vec!["a".to_string(), "c".to_string(), "b".to_string(), "d".to_string()]
        );
    }
}
