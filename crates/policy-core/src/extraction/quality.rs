//! Heuristic check for garbled extraction output
//!
//! Fonts without a usable encoding tend to come out as replacement
//! characters, Private Use Area code points or stray control bytes. The check
//! only feeds a warning; extraction results are never altered by it.

/// Share of garbage characters above which the text is suspect
const GARBAGE_THRESHOLD: f64 = 0.15;
/// Share of Private Use Area characters above which the encoding is suspect
const PUA_THRESHOLD: f64 = 0.10;

#[derive(Debug, Clone, PartialEq)]
pub struct TextQuality {
    pub garbage_ratio: f64,
    pub private_use_ratio: f64,
    pub details: String,
}

impl TextQuality {
    pub fn is_suspect(&self) -> bool {
        self.garbage_ratio > GARBAGE_THRESHOLD || self.private_use_ratio > PUA_THRESHOLD
    }
}

pub fn assess(text: &str) -> TextQuality {
    let total = text.chars().count();
    if total == 0 {
        return TextQuality {
            garbage_ratio: 0.0,
            private_use_ratio: 0.0,
            details: "No text extracted".to_string(),
        };
    }

    let mut replacement = 0usize;
    let mut private_use = 0usize;
    let mut control = 0usize;

    for c in text.chars() {
        match c {
            '\u{FFFD}' => replacement += 1,
            '\u{E000}'..='\u{F8FF}' => private_use += 1,
            c if c.is_control() && !matches!(c, '\n' | '\r' | '\t') => control += 1,
            _ => {}
        }
    }

    let garbage_ratio = (replacement + private_use + control) as f64 / total as f64;
    let private_use_ratio = private_use as f64 / total as f64;

    let details = if private_use_ratio > PUA_THRESHOLD {
        format!(
            "High Private Use Area ratio: {:.1}%, font encoding likely unsupported",
            private_use_ratio * 100.0
        )
    } else if garbage_ratio > GARBAGE_THRESHOLD {
        format!(
            "High garbage ratio: {:.1}% (replacement: {}, PUA: {}, control: {})",
            garbage_ratio * 100.0,
            replacement,
            private_use,
            control
        )
    } else {
        format!("Text looks clean: {:.2}% garbage", garbage_ratio * 100.0)
    };

    TextQuality {
        garbage_ratio,
        private_use_ratio,
        details,
    }
}
