/// Retrospective board templates.
///
/// Built-in templates ship with the app; custom templates live in the
/// `custom_templates` table and are scoped to a team, an organization, or
/// published to everyone.
use serde::{Deserialize, Serialize};

use crate::types::Profile;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateColumn {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl TemplateColumn {
    fn new(title: &str, description: &str, color: &str) -> Self {
        Self {
            title: title.to_string(),
            description: Some(description.to_string()),
            color: Some(color.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetroTemplate {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub columns: Vec<TemplateColumn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub is_builtin: bool,
}

impl RetroTemplate {
    /// Whether a member of `team_id` / `organization_id` may use this template.
    pub fn is_visible_to(&self, team_id: Option<&str>, organization_id: Option<&str>) -> bool {
        if self.is_builtin || self.is_public {
            return true;
        }
        let team_match = matches!((self.team_id.as_deref(), team_id), (Some(a), Some(b)) if a == b);
        let org_match = matches!(
            (self.organization_id.as_deref(), organization_id),
            (Some(a), Some(b)) if a == b
        );
        team_match || org_match
    }
}

pub const DEFAULT_TEMPLATE_ID: &str = "default";

fn builtin(id: &str, name: &str, description: &str, columns: Vec<TemplateColumn>) -> RetroTemplate {
    RetroTemplate {
        id: id.to_string(),
        name: name.to_string(),
        description: Some(description.to_string()),
        columns,
        team_id: None,
        organization_id: None,
        is_public: true,
        is_builtin: true,
    }
}

pub fn builtin_templates() -> Vec<RetroTemplate> {
    vec![
        builtin(
            DEFAULT_TEMPLATE_ID,
            "Default",
            "What went well, what could be improved, and what to act on",
            vec![
                TemplateColumn::new("What went well?", "Celebrate successes", "#22C55E"),
                TemplateColumn::new("What could be improved?", "Identify problems", "#EF4444"),
                TemplateColumn::new("What blocked us?", "Surface impediments", "#F59E0B"),
                TemplateColumn::new("Action items", "Commit to changes", "#3B82F6"),
            ],
        ),
        builtin(
            "start-stop-continue",
            "Start, Stop, Continue",
            "Decide which practices to adopt, drop, or keep",
            vec![
                TemplateColumn::new("Start", "Things we should begin doing", "#22C55E"),
                TemplateColumn::new("Stop", "Things we should stop doing", "#EF4444"),
                TemplateColumn::new("Continue", "Things that are working", "#3B82F6"),
            ],
        ),
        builtin(
            "mad-sad-glad",
            "Mad, Sad, Glad",
            "Reflect on how the sprint felt",
            vec![
                TemplateColumn::new("Mad", "What frustrated you?", "#EF4444"),
                TemplateColumn::new("Sad", "What disappointed you?", "#6366F1"),
                TemplateColumn::new("Glad", "What made you happy?", "#22C55E"),
            ],
        ),
        builtin(
            "4ls",
            "4Ls",
            "Liked, Learned, Lacked, Longed for",
            vec![
                TemplateColumn::new("Liked", "What did you enjoy?", "#22C55E"),
                TemplateColumn::new("Learned", "What did you learn?", "#3B82F6"),
                TemplateColumn::new("Lacked", "What was missing?", "#F59E0B"),
                TemplateColumn::new("Longed for", "What do you wish you had?", "#8B5CF6"),
            ],
        ),
        builtin(
            "sailboat",
            "Sailboat",
            "Wind, anchors, rocks, and the island we sail to",
            vec![
                TemplateColumn::new("Wind", "What pushes us forward?", "#0EA5E9"),
                TemplateColumn::new("Anchors", "What holds us back?", "#78716C"),
                TemplateColumn::new("Rocks", "What risks lie ahead?", "#EF4444"),
                TemplateColumn::new("Island", "Where are we heading?", "#22C55E"),
            ],
        ),
    ]
}

/// Built-ins followed by the custom templates visible to the caller.
pub fn available_templates(
    custom: &[RetroTemplate],
    team_id: Option<&str>,
    organization_id: Option<&str>,
) -> Vec<RetroTemplate> {
    let mut templates = builtin_templates();
    templates.extend(
        custom
            .iter()
            .filter(|t| t.is_visible_to(team_id, organization_id))
            .cloned(),
    );
    templates
}

/// The template a new board should start from: the profile's preference if
/// it is still available, otherwise the default.
pub fn resolve_template<'a>(
    profile: Option<&Profile>,
    available: &'a [RetroTemplate],
) -> Option<&'a RetroTemplate> {
    profile
        .and_then(|p| p.preferred_template.as_deref())
        .and_then(|id| available.iter().find(|t| t.id == id))
        .or_else(|| available.iter().find(|t| t.id == DEFAULT_TEMPLATE_ID))
        .or_else(|| available.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(id: &str, team: Option<&str>, org: Option<&str>, public: bool) -> RetroTemplate {
        RetroTemplate {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            columns: vec![TemplateColumn {
                title: "Only".into(),
                description: None,
                color: None,
            }],
            team_id: team.map(str::to_string),
            organization_id: org.map(str::to_string),
            is_public: public,
            is_builtin: false,
        }
    }

    #[test]
    fn test_visibility_scoping() {
        let customs = vec![
            custom("team-a", Some("a"), None, false),
            custom("team-b", Some("b"), None, false),
            custom("org-x", None, Some("x"), false),
            custom("shared", Some("z"), None, true),
        ];
        let ids: Vec<String> = available_templates(&customs, Some("a"), Some("x"))
            .into_iter()
            .filter(|t| !t.is_builtin)
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["team-a", "org-x", "shared"]);
    }

    #[test]
    fn test_resolve_preferred_template() {
        let available = available_templates(&[custom("mine", Some("a"), None, false)], Some("a"), None);
        let profile = Profile {
            id: "u1".into(),
            preferred_template: Some("mine".into()),
            template_preferences: None,
        };
        assert_eq!(resolve_template(Some(&profile), &available).unwrap().id, "mine");
    }

    #[test]
    fn test_resolve_falls_back_to_default() {
        let available = builtin_templates();
        let profile = Profile {
            id: "u1".into(),
            preferred_template: Some("deleted-template".into()),
            template_preferences: None,
        };
        assert_eq!(
            resolve_template(Some(&profile), &available).unwrap().id,
            DEFAULT_TEMPLATE_ID
        );
        assert_eq!(resolve_template(None, &available).unwrap().id, DEFAULT_TEMPLATE_ID);
        assert!(resolve_template(None, &[]).is_none());
    }

    #[test]
    fn test_columns_json_shape() {
        let template: RetroTemplate = serde_json::from_value(serde_json::json!({
            "id": "t1",
            "name": "Custom",
            "columns": [{"title": "Kudos", "color": "#EC4899"}],
            "team_id": "team-1"
        }))
        .unwrap();
        assert!(!template.is_public);
        assert_eq!(template.columns[0].title, "Kudos");
        assert!(template.is_visible_to(Some("team-1"), None));
        assert!(!template.is_visible_to(Some("team-2"), None));
    }
}
