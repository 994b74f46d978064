use regex::Regex;
use std::sync::LazyLock;

use super::types::GuideStepDraft;

pub const MIN_COMPLEXITY: u8 = 1;
pub const MAX_COMPLEXITY: u8 = 10;

const HARDWARE_BONUS: usize = 2;

static HARDWARE_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(wir(e|es|ing)|pins?|gpio|breadboard|solder(ing)?|resistors?|leds?|esp32|esp8266|arduino|raspberry pi|voltage|volts?|sensors?|3v3|gnd|microcontrollers?|multimeter|capacitors?)\b",
    )
    .expect("hardware marker pattern is valid")
});

/// True when any of `texts` mentions physical wiring or electronics.
pub fn has_hardware_markers<'a>(texts: impl IntoIterator<Item = &'a str>) -> bool {
    texts.into_iter().any(|t| HARDWARE_MARKERS.is_match(t))
}

/// Scores a breakdown from 1 to 10.
///
/// Grows by one for every two steps and by two for hardware content.
pub fn complexity_score(title: &str, description: &str, steps: &[GuideStepDraft]) -> u8 {
    let texts = [title, description].into_iter().chain(steps.iter().flat_map(|s| {
        [s.title.as_str(), s.description.as_str()]
            .into_iter()
            .chain(s.detailed_instructions.as_deref())
    }));
    let bonus = if has_hardware_markers(texts) {
        HARDWARE_BONUS
    } else {
        0
    };
    let raw = 1usize
        .saturating_add(steps.len() / 2)
        .saturating_add(bonus);
    raw.clamp(MIN_COMPLEXITY as usize, MAX_COMPLEXITY as usize) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(n: usize, text: &str) -> Vec<GuideStepDraft> {
        (1..=n)
            .map(|i| GuideStepDraft {
                step_number: i as u32,
                title: format!("Step {i}"),
                description: text.to_string(),
                detailed_instructions: None,
                estimated_time: None,
                dependencies: vec![],
                resources: vec![],
                code_snippets: vec![],
                tips: None,
                warnings: None,
                verification_steps: None,
            })
            .collect()
    }

    #[test]
    fn monotonic_in_step_count() {
        for text in ["Install the package", "Connect the LED to GPIO 4"] {
            let mut prev = 0;
            for n in 0..40 {
                let score = complexity_score("Task", "", &steps(n, text));
                assert!(score >= prev, "{n} steps scored {score} < {prev}");
                assert!((MIN_COMPLEXITY..=MAX_COMPLEXITY).contains(&score));
                prev = score;
            }
        }
    }

    #[test]
    fn hardware_adds_bonus() {
        let software = complexity_score("Set up Express", "", &steps(4, "Run npm install"));
        let hardware = complexity_score("Blink", "", &steps(4, "Solder the resistor"));
        assert_eq!(software, 3);
        assert_eq!(hardware, 5);
    }

    #[test]
    fn markers_match_whole_words_only() {
        assert!(has_hardware_markers(["Wire the sensor to 3V3"]));
        assert!(has_hardware_markers(["Flash the ESP32"]));
        assert!(!has_hardware_markers(["Open the spinner component"]));
        assert!(!has_hardware_markers(["Use a wireframe tool"]));
    }

    #[test]
    fn clamped_to_ten() {
        assert_eq!(
            complexity_score("Arduino", "", &steps(100, "wiring")),
            MAX_COMPLEXITY
        );
        assert_eq!(complexity_score("", "", &[]), MIN_COMPLEXITY);
    }
}
