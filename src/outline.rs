use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{Error, Result};

/// Caller supplied course outline: ordered modules, each an ordered list of subtopics.
///
/// Ids are never taken from the caller, they are derived from positions by [`Outline::leaves`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Outline {
    #[serde(rename = "course_mastertitle_breakdown", default)]
    pub modules: Vec<OutlineModule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct OutlineModule {
    #[serde(rename = "master_title", default)]
    pub title: String,
    #[serde(default)]
    pub subtitles: Vec<String>,
}

/// One (module, subtitle) pair, the unit of content generation work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leaf<'a> {
    pub module_id: i64,
    pub module_title: &'a str,
    pub subtitle_id: i64,
    pub subtitle: &'a str,
}

impl Outline {
    pub fn validate(&self) -> Result<()> {
        if self.modules.is_empty() {
            return Err(Error::InvalidInput(
                "outline must contain at least one module".to_string(),
            ));
        }
        for (idx, module) in self.modules.iter().enumerate() {
            let position = idx + 1;
            if module.title.trim().is_empty() {
                return Err(Error::InvalidInput(format!(
                    "module {position} has no master_title"
                )));
            }
            if module.subtitles.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "module {position} ({}) has no subtitles",
                    module.title
                )));
            }
            if let Some(blank) = module.subtitles.iter().position(|s| s.trim().is_empty()) {
                return Err(Error::InvalidInput(format!(
                    "module {position} ({}) has an empty subtitle at position {}",
                    module.title,
                    blank + 1
                )));
            }
        }
        Ok(())
    }

    pub fn total_items(&self) -> usize {
        self.modules.iter().map(|m| m.subtitles.len()).sum()
    }

    /// Leaves in traversal order: module 1..=M, and within each module subtitle 1..=S.
    pub fn leaves(&self) -> impl Iterator<Item = Leaf<'_>> {
        self.modules.iter().zip(1..).flat_map(|(module, module_id)| {
            module
                .subtitles
                .iter()
                .zip(1..)
                .map(move |(subtitle, subtitle_id)| Leaf {
                    module_id,
                    module_title: &module.title,
                    subtitle_id,
                    subtitle,
                })
        })
    }
}

#[cfg(test)]
pub(crate) fn sample_outline(sizes: &[usize]) -> Outline {
    Outline {
        modules: sizes
            .iter()
            .enumerate()
            .map(|(m, &count)| OutlineModule {
                title: format!("Module {}", m + 1),
                subtitles: (1..=count).map(|s| format!("Topic {}.{}", m + 1, s)).collect(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_and_reset_per_module() {
        let outline = sample_outline(&[2, 3]);
        let ids: Vec<(i64, i64)> = outline
            .leaves()
            .map(|l| (l.module_id, l.subtitle_id))
            .collect();
        assert_eq!(ids, vec![(1, 1), (1, 2), (2, 1), (2, 2), (2, 3)]);
        assert_eq!(outline.total_items(), 5);
        assert_eq!(outline.leaves().count(), outline.total_items());
    }

    #[test]
    fn id_assignment_is_reproducible() {
        let outline = sample_outline(&[1, 4, 2]);
        let first: Vec<_> = outline.leaves().collect();
        let second: Vec<_> = outline.clone().leaves().map(|l| (l.module_id, l.subtitle_id)).collect();
        assert_eq!(
            first.iter().map(|l| (l.module_id, l.subtitle_id)).collect::<Vec<_>>(),
            second
        );
        assert_eq!(
            first.iter().map(|l| (l.module_id, l.subtitle_id)).collect::<Vec<_>>(),
            [(1, 1), (2, 1), (2, 2), (2, 3), (2, 4), (3, 1)]
        );
        assert_eq!(first[4].module_title, "Module 2");
        assert_eq!(first[4].subtitle, "Topic 2.4");
        assert_eq!(first[5].module_title, "Module 3");
        assert_eq!(first[5].subtitle, "Topic 3.1");
    }

    #[test]
    fn parses_wire_format() {
        let outline: Outline = serde_json::from_str(
            r#"{"course_mastertitle_breakdown": [
                {"master_title": "Introduction to Python", "subtitles": ["What is Python?", "Installation"]},
                {"master_title": "Python Basics", "subtitles": ["Variables"]}
            ]}"#,
        )
        .unwrap();
        outline.validate().unwrap();
        assert_eq!(outline.total_items(), 3);
        assert_eq!(outline.modules[1].title, "Python Basics");
    }

    #[test]
    fn rejects_malformed_outlines() {
        let empty = Outline::default();
        assert!(matches!(empty.validate(), Err(Error::InvalidInput(_))));

        let missing_subtitles: Outline =
            serde_json::from_str(r#"{"course_mastertitle_breakdown": [{"master_title": "A"}]}"#)
                .unwrap();
        assert!(matches!(missing_subtitles.validate(), Err(Error::InvalidInput(_))));

        let missing_title: Outline =
            serde_json::from_str(r#"{"course_mastertitle_breakdown": [{"subtitles": ["x"]}]}"#)
                .unwrap();
        assert!(matches!(missing_title.validate(), Err(Error::InvalidInput(_))));

        let blank_subtitle = Outline {
            modules: vec![OutlineModule {
                title: "A".to_string(),
                subtitles: vec!["x".to_string(), "  ".to_string()],
            }],
        };
        let Err(Error::InvalidInput(message)) = blank_subtitle.validate() else {
            panic!("blank subtitle accepted");
        };
        assert!(message.contains("position 2"));
    }
}
