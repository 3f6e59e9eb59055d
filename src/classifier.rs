//! Message Classifier
//!
//! Cheap keyword heuristics run before the budget pre-check:
//! - Write intent: the user is recording or changing something ("I spent 40 on food")
//! - Amounts: every money-looking number in the message
//! - Category mentions: candidate phrases that may name a budget category

/// Static keyword lists, zero allocation
const WRITE_KEYWORDS: &[&str] = &[
    // Spending
    "spent", "paid", "bought", "purchased",
    // Recording
    "add", "record", "log", "save", "track",
    // Budget changes
    "set", "increase", "decrease", "raise", "lower",
    // Income
    "received", "earned", "got paid",
];

const CATEGORY_MARKERS: &[&str] = &["on", "for", "in", "at", "to", "from"];

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "my", "me", "i", "this", "that", "last", "next", "month", "week",
    "today", "yesterday", "budget", "category", "and", "of",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageSignals {
    pub write_intent: bool,
    pub amounts: Vec<f64>,
    pub category_mentions: Vec<String>,
}

impl MessageSignals {
    /// True when the budget pre-check has something to look at
    pub fn needs_budget_check(&self) -> bool {
        self.write_intent || !self.category_mentions.is_empty()
    }
}

/// Message classifier
pub struct MessageClassifier;

impl MessageClassifier {
    pub fn classify(message: &str) -> MessageSignals {
        let lowered = message.to_lowercase();
        let words = tokenize(&lowered);

        MessageSignals {
            write_intent: contains_write_intent(&lowered, &words),
            amounts: extract_amounts(&lowered),
            category_mentions: category_mentions(&words),
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '.' || c == '\''))
        .map(|w| w.trim_matches('.').to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

fn contains_write_intent(lowered: &str, words: &[String]) -> bool {
    WRITE_KEYWORDS.iter().any(|kw| {
        if kw.contains(' ') {
            lowered.contains(kw)
        } else {
            words.iter().any(|w| w == kw)
        }
    })
}

/// Numbers with an optional currency sign and thousands separators
pub fn extract_amounts(text: &str) -> Vec<f64> {
    let mut amounts = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        if c.is_ascii_digit() || ((c == '.' || c == ',') && !current.is_empty()) {
            current.push(c);
        } else if !current.is_empty() {
            push_amount(&mut current, &mut amounts);
        }
    }
    if !current.is_empty() {
        push_amount(&mut current, &mut amounts);
    }

    amounts
}

fn push_amount(current: &mut String, amounts: &mut Vec<f64>) {
    let cleaned = current.trim_end_matches(['.', ',']).replace(',', "");
    if let Ok(value) = cleaned.parse::<f64>() {
        amounts.push(value);
    }
    current.clear();
}

/// Phrases following "on"/"for"/... up to the next marker or number
fn category_mentions(words: &[String]) -> Vec<String> {
    let mut mentions = Vec::new();
    let mut i = 0;

    while i < words.len() {
        if CATEGORY_MARKERS.contains(&words[i].as_str()) {
            let phrase: Vec<&str> = words[i + 1..]
                .iter()
                .take_while(|w| {
                    !CATEGORY_MARKERS.contains(&w.as_str())
                        && !w.chars().next().is_some_and(|c| c.is_ascii_digit())
                })
                .map(|w| w.as_str())
                .filter(|w| !STOP_WORDS.contains(w))
                .collect();

            if !phrase.is_empty() {
                mentions.push(phrase.join(" "));
            }
        }
        i += 1;
    }

    mentions.dedup();
    mentions
}
