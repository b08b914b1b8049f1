// src/routing.rs
//
// Keyword-based routing for the assistant's text branch: a scope filter that
// keeps the bot on dermatology topics, and an ordered rule table that picks
// the processing mode for an in-scope message. Tie-break order is explicit:
// followup beats treatment keywords, treatment keywords beat specialist
// keywords, everything else is general chat.

/// Fixed refusal returned for out-of-scope messages.
pub const REFUSAL_MESSAGE: &str = "I specialize only in dermatology and skin health questions. \
    Please ask me about skin conditions, treatments, or related medical concerns.";

const HEALTHCARE_KEYWORDS: &[&str] = &[
    "skin", "rash", "acne", "treatment", "medicine", "doctor",
    "dermatologist", "itch", "itchy", "red", "bump", "pimple",
    "eczema", "psoriasis", "melanoma", "hives", "allergy",
    "infection", "diagnose", "symptom", "pain", "swelling",
    "prescription", "medical", "health", "disease", "condition",
    "cure", "relief", "ointment", "cream", "antibiotic", "fungal",
    "virus", "bacteria", "allergic", "reaction", "scar", "mark",
    "spot", "patch", "dry", "oily", "sensitive", "burn", "sting",
    "peel", "blister", "wart", "mole", "freckle", "hello", "hey",
    "thank you",
];

// Explicit off-topic phrases win over any keyword match.
const NON_HEALTHCARE_PHRASES: &[&str] = &["joke", "code"];

const SEARCH_KEYWORDS: &[&str] = &["treatment", "medicine", "remedy"];

const SPECIALIST_KEYWORDS: &[&str] = &["dermatologist", "doctor", "specialist", "recommend a doctor"];

/// Processing mode for a text turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    MedicalSearch,
    DermatologistQuery,
    GeneralChat,
}

/// Whether the message is in scope for the assistant at all.
pub fn is_healthcare_question(message: &str) -> bool {
    let message_lower = message.to_lowercase();

    if NON_HEALTHCARE_PHRASES.iter().any(|p| message_lower.contains(p)) {
        return false;
    }

    HEALTHCARE_KEYWORDS.iter().any(|k| message_lower.contains(k))
}

/// Ordered rule table. A followup turn (the synthesized message after an
/// image diagnosis) always goes to general chat so the model can elaborate
/// on the diagnosis it just produced.
pub fn determine_intent(message: &str, is_followup: bool) -> Intent {
    let message_lower = message.to_lowercase();

    let rules: &[(&dyn Fn(&str) -> bool, Intent)] = &[
        (&|_: &str| is_followup, Intent::GeneralChat),
        (
            &|m: &str| SEARCH_KEYWORDS.iter().any(|k| m.contains(k)),
            Intent::MedicalSearch,
        ),
        (
            &|m: &str| SPECIALIST_KEYWORDS.iter().any(|k| m.contains(k)),
            Intent::DermatologistQuery,
        ),
    ];

    for (predicate, intent) in rules {
        if predicate(&message_lower) {
            return *intent;
        }
    }

    Intent::GeneralChat
}

/// Pulls the condition out of a "... specializing in <condition>" query, if
/// the phrase is present. The returned condition is lowercased and trimmed.
pub fn extract_specialization(message: &str) -> Option<String> {
    let message_lower = message.to_lowercase();
    let (_, condition) = message_lower.split_once("specializing in")?;
    let condition = condition.trim();
    if condition.is_empty() {
        None
    } else {
        Some(condition.to_string())
    }
}

/// Context-aware suggested actions for a general chat turn.
pub fn followup_actions(message: &str) -> Vec<String> {
    let message_lower = message.to_lowercase();
    let mut actions = Vec::new();

    if ["treatment", "medicine"].iter().any(|w| message_lower.contains(w)) {
        actions.push("alternative_treatments".to_string());
    }
    if message_lower.contains("serious") {
        actions.push("emergency_contact".to_string());
    }
    if ["prevent", "avoid"].iter().any(|w| message_lower.contains(w)) {
        actions.push("prevention_tips".to_string());
    }

    if actions.is_empty() {
        actions = vec![
            "learn_more".to_string(),
            "ask_specialist".to_string(),
            "related_conditions".to_string(),
        ];
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_non_healthcare_messages() {
        assert!(!is_healthcare_question("tell me a joke"));
        assert!(!is_healthcare_question("write some code for me"));
        assert!(!is_healthcare_question("what is the capital of France"));
    }

    #[test]
    fn refusal_phrases_win_over_keywords() {
        // Contains "acne" but also "joke": off-topic phrases take precedence.
        assert!(!is_healthcare_question("tell me a joke about acne"));
    }

    #[test]
    fn accepts_dermatology_messages() {
        assert!(is_healthcare_question("I have an itchy rash on my arm"));
        assert!(is_healthcare_question("hello"));
        assert!(is_healthcare_question("Is ECZEMA contagious?"));
    }

    #[test]
    fn followup_forces_general_chat() {
        assert_eq!(
            determine_intent("what treatment should I use?", true),
            Intent::GeneralChat
        );
    }

    #[test]
    fn treatment_keywords_select_medical_search() {
        assert_eq!(
            determine_intent("what is the best treatment for psoriasis", false),
            Intent::MedicalSearch
        );
        assert_eq!(
            determine_intent("is there a home remedy for hives", false),
            Intent::MedicalSearch
        );
    }

    #[test]
    fn treatment_beats_specialist_keywords() {
        // Both keyword families present: the rule table checks treatment first.
        assert_eq!(
            determine_intent("what treatment would a dermatologist recommend", false),
            Intent::MedicalSearch
        );
    }

    #[test]
    fn specialist_keywords_select_dermatologist_query() {
        assert_eq!(
            determine_intent("can you recommend a dermatologist near me", false),
            Intent::DermatologistQuery
        );
        assert_eq!(
            determine_intent("I need to see a doctor about this mole", false),
            Intent::DermatologistQuery
        );
    }

    #[test]
    fn defaults_to_general_chat() {
        assert_eq!(
            determine_intent("my skin feels dry in winter", false),
            Intent::GeneralChat
        );
    }

    #[test]
    fn extracts_specialization_phrase() {
        assert_eq!(
            extract_specialization("find a dermatologist specializing in acne"),
            Some("acne".to_string())
        );
        assert_eq!(
            extract_specialization("Specializing in   Melanoma "),
            Some("melanoma".to_string())
        );
        assert_eq!(extract_specialization("find a dermatologist"), None);
        assert_eq!(extract_specialization("specializing in"), None);
    }

    #[test]
    fn followup_actions_match_message_content() {
        assert_eq!(
            followup_actions("what medicine helps with this"),
            vec!["alternative_treatments"]
        );
        assert_eq!(
            followup_actions("is this serious?"),
            vec!["emergency_contact"]
        );
        assert_eq!(
            followup_actions("how do I prevent flare ups"),
            vec!["prevention_tips"]
        );
        assert_eq!(
            followup_actions("what is rosacea"),
            vec!["learn_more", "ask_specialist", "related_conditions"]
        );
    }
}
