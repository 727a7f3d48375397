use crate::contains_any;
use snare_core::Persona;

const TECH_CUES: [&str; 5] = ["link", "download", "app", "update", "install"];
const AUTHORITY_CUES: [&str; 7] = [
    "government",
    "police",
    "tax",
    "pension",
    "rbi",
    "customs",
    "arrest",
];
const REWARD_CUES: [&str; 6] = [
    "won",
    "prize",
    "lottery",
    "reward",
    "winner",
    "congratulations",
];

/// Picks the deception persona from the first message's pattern tags.
pub fn select_persona(tags: &[String]) -> Persona {
    let joined = tags.join(" ").to_lowercase();

    if contains_any(&joined, &TECH_CUES) {
        Persona::YoungNaive
    } else if contains_any(&joined, &AUTHORITY_CUES) {
        Persona::ElderlyConfused
    } else if contains_any(&joined, &REWARD_CUES) {
        Persona::ExcitedSkeptical
    } else {
        Persona::WorriedParent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn link_tag_selects_young_naive() {
        assert_eq!(
            select_persona(&tags(&["urgency:urgent", "link_present"])),
            Persona::YoungNaive
        );
    }

    #[test]
    fn authority_tags_select_elderly() {
        assert_eq!(
            select_persona(&tags(&["impersonation:income tax"])),
            Persona::ElderlyConfused
        );
    }

    #[test]
    fn tech_cues_take_priority_over_rewards() {
        let assessment = score("You won a prize! Download the app to claim");
        assert_eq!(select_persona(&assessment.tags), Persona::YoungNaive);
        let assessment = score("You won the lottery");
        assert_eq!(select_persona(&assessment.tags), Persona::ExcitedSkeptical);
    }

    #[test]
    fn no_cues_defaults_to_worried_parent() {
        assert_eq!(select_persona(&[]), Persona::WorriedParent);
        assert_eq!(
            select_persona(&tags(&["financial:account"])),
            Persona::WorriedParent
        );
    }
}
