//! Default prompt templates bundled at compile time.

/// Structure worker - architecture, complexity, feature gaps
pub const STRUCTURE_ANALYZER: &str = include_str!("defaults/structure_analyzer.md");

/// Change history worker - pull requests and commits
pub const CHANGE_HISTORY_ANALYZER: &str = include_str!("defaults/change_history_analyzer.md");

/// Defect history worker - issue tracker
pub const DEFECT_HISTORY_ANALYZER: &str = include_str!("defaults/defect_history_analyzer.md");

/// Dependency worker - tech stack and dependency health
pub const DEPENDENCY_ANALYZER: &str = include_str!("defaults/dependency_analyzer.md");

/// Output envelope appended to every analysis prompt
pub const FRAGMENT_CONTRACT: &str = include_str!("defaults/fragment_contract.md");

/// Generator - creates and refines problem statements
pub const GENERATOR: &str = include_str!("defaults/generator.md");

/// Validator - scores problem statements
pub const VALIDATOR: &str = include_str!("defaults/validator.md");

/// All default prompts with their slugs
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        ("structure_analyzer", STRUCTURE_ANALYZER),
        ("change_history_analyzer", CHANGE_HISTORY_ANALYZER),
        ("defect_history_analyzer", DEFECT_HISTORY_ANALYZER),
        ("dependency_analyzer", DEPENDENCY_ANALYZER),
        ("fragment_contract", FRAGMENT_CONTRACT),
        ("generator", GENERATOR),
        ("validator", VALIDATOR),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_prompts_non_empty() {
        for (slug, content) in all_defaults() {
            assert!(!content.is_empty(), "Prompt '{}' should not be empty", slug);
            assert!(content.len() > 50, "Prompt '{}' seems too short", slug);
        }
    }

    #[test]
    fn test_validator_prompt_names_every_dimension() {
        for key in ["feasibility", "clarity", "technical_fit", "educational_value"] {
            assert!(VALIDATOR.contains(key), "missing dimension {}", key);
        }
    }
}
