//! Spoken-number normalization
//!
//! Speech engines frequently render quantities as words ("seven hundred",
//! "six and a half"). Everything here rewrites such phrases into digit
//! literals so the grammar rules only ever deal with `\d+(\.\d+)?`.
//!
//! Order matters: fractions and clock times must be rewritten before the
//! generic substitution, otherwise "seven thirty" would collapse into 37
//! and "oh five" would lose its leading zero.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberWord {
    Unit(u64),
    Scale(u64),
}

fn number_word(word: &str) -> Option<NumberWord> {
    let value = match word {
        "zero" => 0,
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        "thirteen" => 13,
        "fourteen" => 14,
        "fifteen" => 15,
        "sixteen" => 16,
        "seventeen" => 17,
        "eighteen" => 18,
        "nineteen" => 19,
        "twenty" => 20,
        "thirty" => 30,
        "forty" | "fourty" => 40,
        "fifty" => 50,
        "sixty" => 60,
        "seventy" => 70,
        "eighty" => 80,
        "ninety" => 90,
        "hundred" => return Some(NumberWord::Scale(100)),
        "thousand" => return Some(NumberWord::Scale(1_000)),
        "million" => return Some(NumberWord::Scale(1_000_000)),
        _ => return None,
    };
    Some(NumberWord::Unit(value))
}

fn digit_word(word: &str) -> Option<u64> {
    match word {
        "oh" | "o" => Some(0),
        w => match number_word(w) {
            Some(NumberWord::Unit(n)) if n < 10 => Some(n),
            _ => None,
        },
    }
}

fn is_number_word(word: &str) -> bool {
    number_word(word).is_some()
}

/// Compose a sequence of number words into a value.
///
/// Units and tens accumulate additively; "hundred" multiplies the value
/// accumulated so far, while "thousand"/"million" multiply it and flush the
/// result into the running total. "and" is ignored between number words.
/// Returns `None` if the phrase contains anything that is not a number word
/// or the value does not fit in a `u64`.
pub fn words_to_number(text: &str) -> Option<u64> {
    let mut total: u64 = 0;
    let mut current: u64 = 0;
    let mut seen = false;

    for word in text
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|w| !w.is_empty())
    {
        let word = word.to_lowercase();
        if word == "and" {
            continue;
        }
        match number_word(&word)? {
            NumberWord::Unit(n) => current = current.checked_add(n)?,
            NumberWord::Scale(100) => current = current.max(1).checked_mul(100)?,
            NumberWord::Scale(scale) => {
                total = current
                    .max(1)
                    .checked_mul(scale)
                    .and_then(|v| total.checked_add(v))?;
                current = 0;
            }
        }
        seen = true;
    }

    if !seen {
        return None;
    }
    total.checked_add(current)
}

/// A word token with any trailing punctuation split off.
struct Token<'a> {
    core: &'a str,
    trailing: &'a str,
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    text.split_whitespace()
        .map(|raw| {
            let end = raw.trim_end_matches([',', ';', '!', '?']).len();
            Token {
                core: &raw[..end],
                trailing: &raw[end..],
            }
        })
        .collect()
}

fn hyphen_parts(word: &str) -> Option<Vec<&str>> {
    let parts: Vec<&str> = word.split('-').collect();
    (parts.len() > 1 && parts.iter().all(|p| is_number_word(p))).then_some(parts)
}

fn is_numeric_token(word: &str) -> bool {
    is_number_word(word) || hyphen_parts(word).is_some()
}

fn ends_with_scale(words: &[&str]) -> bool {
    words
        .last()
        .and_then(|w| w.rsplit('-').next())
        .and_then(number_word)
        .is_some_and(|w| matches!(w, NumberWord::Scale(_)))
}

fn format_decimal(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded}")
    }
}

/// Replace cardinal number phrases with digit literals.
///
/// "two thousand five hundred calories" becomes "2500 calories" and
/// "seventy two point five kilos" becomes "72.5 kilos". Punctuation after a
/// number phrase ends it and is preserved.
pub fn substitute_number_words(text: &str) -> String {
    let tokens = tokenize(text);
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    let mut i = 0;

    while i < tokens.len() {
        if !is_numeric_token(tokens[i].core) {
            out.push(format!("{}{}", tokens[i].core, tokens[i].trailing));
            i += 1;
            continue;
        }

        let mut words: Vec<&str> = Vec::new();
        let mut trailing = "";
        let mut j = i;
        while j < tokens.len() {
            let tok = &tokens[j];
            let joins = if tok.core == "and" {
                ends_with_scale(&words)
                    && tokens
                        .get(j + 1)
                        .is_some_and(|next| is_numeric_token(next.core))
            } else {
                is_numeric_token(tok.core)
            };
            if !joins {
                break;
            }
            words.push(tok.core);
            j += 1;
            if !tok.trailing.is_empty() {
                trailing = tok.trailing;
                break;
            }
        }

        let Some(whole) = words_to_number(&words.join(" ")) else {
            out.push(format!("{}{}", tokens[i].core, tokens[i].trailing));
            i += 1;
            continue;
        };

        let mut literal = whole.to_string();
        if trailing.is_empty() && tokens.get(j).is_some_and(|t| t.core == "point") {
            let mut digits = String::new();
            let mut k = j + 1;
            while let Some(d) = tokens.get(k).and_then(|t| digit_word(t.core)) {
                digits.push_str(&d.to_string());
                trailing = tokens[k].trailing;
                k += 1;
                if !trailing.is_empty() {
                    break;
                }
            }
            if !digits.is_empty() {
                literal = format!("{literal}.{digits}");
                j = k;
            }
        }

        out.push(format!("{literal}{trailing}"));
        i = j;
    }

    out.join(" ")
}

fn fraction_at(tokens: &[Token<'_>], at: usize) -> Option<(f64, usize)> {
    let word = |k: usize| tokens.get(at + k).map(|t| t.core);
    match (word(0), word(1)) {
        (Some("a" | "one"), Some("half")) => Some((0.5, 2)),
        (Some("a" | "one"), Some("quarter")) => Some((0.25, 2)),
        (Some("three"), Some("quarters")) => Some((0.75, 2)),
        _ => None,
    }
}

fn leading_value(tokens: &[Token<'_>], end: usize) -> Option<(f64, usize)> {
    // Single digit literal, e.g. "7 and a half".
    if let Some(tok) = end.checked_sub(1).and_then(|k| tokens.get(k)) {
        if tok.trailing.is_empty() {
            if let Ok(v) = tok.core.parse::<f64>() {
                return Some((v, end - 1));
            }
        }
    }
    let mut start = end;
    while start > 0 {
        let tok = &tokens[start - 1];
        if !tok.trailing.is_empty() || !is_numeric_token(tok.core) {
            break;
        }
        start -= 1;
    }
    if start == end {
        return None;
    }
    let words: Vec<&str> = tokens[start..end].iter().map(|t| t.core).collect();
    words_to_number(&words.join(" ")).map(|v| (v as f64, start))
}

/// Collapse compound fractions into a single decimal literal.
///
/// "seven and a half hours" becomes "7.5 hours", "six and three quarters"
/// becomes "6.75", "an hour and a half" becomes "1.5 hours" and "half an
/// hour" becomes "0.5 hours".
pub fn normalize_fractions(text: &str) -> String {
    let tokens = tokenize(text);
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    let mut i = 0;

    while i < tokens.len() {
        let core = tokens[i].core;

        if core == "and" && tokens[i].trailing.is_empty() {
            if let Some((frac, len)) = fraction_at(&tokens, i + 1) {
                if let Some((whole, start)) = leading_value(&tokens, i) {
                    let emitted = i - start;
                    out.truncate(out.len().saturating_sub(emitted));
                    let end = i + len;
                    out.push(format!(
                        "{}{}",
                        format_decimal(whole + frac),
                        tokens[end].trailing
                    ));
                    i = end + 1;
                    continue;
                }
            }
        }

        // "an hour and a half"
        if matches!(core, "an" | "one")
            && tokens.get(i + 1).is_some_and(|t| t.core == "hour")
            && tokens.get(i + 2).is_some_and(|t| t.core == "and")
        {
            if let Some((frac, len)) = fraction_at(&tokens, i + 3) {
                let end = i + 2 + len;
                out.push(format!("{} hours{}", format_decimal(1.0 + frac), tokens[end].trailing));
                i = end + 1;
                continue;
            }
        }

        // "half an hour"
        if core == "half"
            && tokens.get(i + 1).is_some_and(|t| t.core == "an")
            && tokens.get(i + 2).is_some_and(|t| t.core == "hour")
        {
            out.push(format!("0.5 hours{}", tokens[i + 2].trailing));
            i += 3;
            continue;
        }

        out.push(format!("{}{}", core, tokens[i].trailing));
        i += 1;
    }

    out.join(" ")
}

/// Half of the day for a 12-hour clock reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Meridiem {
    Am,
    Pm,
}

impl Meridiem {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().trim_end_matches('.').replace(['.', ' '], "").as_str() {
            "am" => Some(Meridiem::Am),
            "pm" => Some(Meridiem::Pm),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Meridiem::Am => "am",
            Meridiem::Pm => "pm",
        }
    }
}

/// A spoken clock reading before conversion to 24-hour time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockTime {
    pub hour: u32,
    pub minute: u32,
    pub meridiem: Option<Meridiem>,
}

impl ClockTime {
    /// Convert to a 24-hour `(hour, minute)` pair.
    ///
    /// "12 am" is midnight (hour 0) and "12 pm" is noon (hour 12). Returns
    /// `None` for readings that are not a valid time of day.
    pub fn to_24h(self) -> Option<(u32, u32)> {
        if self.minute > 59 {
            return None;
        }
        let hour = match self.meridiem {
            Some(_) if self.hour == 0 || self.hour > 12 => return None,
            Some(Meridiem::Am) if self.hour == 12 => 0,
            Some(Meridiem::Pm) if self.hour != 12 => self.hour + 12,
            Some(_) => self.hour,
            None if self.hour > 23 => return None,
            None => self.hour,
        };
        Some((hour, self.minute))
    }
}

fn clock_hour(word: &str) -> Option<u32> {
    match number_word(word) {
        Some(NumberWord::Unit(n)) if (1..=12).contains(&n) => Some(n as u32),
        _ => None,
    }
}

/// Parse the minute portion of a spoken time, returning the minute value
/// and the number of tokens consumed.
fn clock_minute(words: &[&str]) -> Option<(u32, usize)> {
    let first = *words.first()?;
    if matches!(first, "o'clock" | "oclock") {
        return Some((0, 1));
    }
    if matches!(first, "oh" | "o" | "zero") {
        let unit = words.get(1).and_then(|w| digit_word(w)).filter(|d| *d > 0)?;
        return Some((unit as u32, 2));
    }
    if let Some(parts) = hyphen_parts(first) {
        return words_to_number(&parts.join(" "))
            .filter(|m| (20..60).contains(m))
            .map(|m| (m as u32, 1));
    }
    match number_word(first)? {
        NumberWord::Unit(tens @ (20 | 30 | 40 | 50)) => {
            match words.get(1).and_then(|w| digit_word(w)).filter(|d| *d > 0) {
                Some(unit) => Some(((tens + unit) as u32, 2)),
                None => Some((tens as u32, 1)),
            }
        }
        NumberWord::Unit(n @ 10..=19) => Some((n as u32, 1)),
        _ => None,
    }
}

fn clock_meridiem(words: &[&str]) -> Option<(Meridiem, usize)> {
    match words {
        [first, ..] if Meridiem::parse(first).is_some() => {
            Meridiem::parse(first).map(|m| (m, 1))
        }
        [a @ ("a" | "p"), "m" | "m.", ..] => Meridiem::parse(&format!("{a}m")).map(|m| (m, 2)),
        ["in", "the", "morning", ..] => Some((Meridiem::Am, 3)),
        ["in", "the", "afternoon" | "evening", ..] | ["at", "night", ..] => {
            Some((Meridiem::Pm, if words[0] == "at" { 2 } else { 3 }))
        }
        _ => None,
    }
}

/// Find the first spoken clock time in `text`.
///
/// Recognizes an hour word (one..twelve) followed by an optional minute
/// ("thirty", "forty five", "oh five", "o'clock") and an optional meridiem
/// ("am", "p m", "in the morning"). A bare hour only counts when preceded
/// by "at". Returns the reading and the token span it occupies.
pub fn parse_clock_words(text: &str) -> Option<(ClockTime, std::ops::Range<usize>)> {
    let words: Vec<&str> = text
        .split_whitespace()
        .map(|w| w.trim_end_matches([',', ';', '!', '?']))
        .collect();

    for start in 0..words.len() {
        let Some(hour) = clock_hour(words[start]) else {
            continue;
        };
        let mut end = start + 1;
        let mut minute = None;
        if let Some((m, used)) = clock_minute(&words[end..]) {
            minute = Some(m);
            end += used;
        }
        let mut meridiem = None;
        if let Some((m, used)) = clock_meridiem(&words[end..]) {
            meridiem = Some(m);
            end += used;
        }
        let anchored = start > 0 && words[start - 1] == "at";
        if minute.is_none() && meridiem.is_none() && !anchored {
            continue;
        }
        let time = ClockTime {
            hour,
            minute: minute.unwrap_or(0),
            meridiem,
        };
        return Some((time, start..end));
    }
    None
}

/// Rewrite the first spoken clock time in `text` as `H:MM [am|pm]`.
pub fn clock_words_to_digits(text: &str) -> String {
    let Some((time, span)) = parse_clock_words(text) else {
        return text.to_string();
    };
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut literal = format!("{}:{:02}", time.hour, time.minute);
    if let Some(m) = time.meridiem {
        literal.push(' ');
        literal.push_str(m.as_str());
    }
    let mut out: Vec<String> = words[..span.start].iter().map(|w| w.to_string()).collect();
    out.push(literal);
    out.extend(words[span.end..].iter().map(|w| w.to_string()));
    out.join(" ")
}

/// Coarse check for utterances about waking up.
pub fn is_wake_time_utterance(text: &str) -> bool {
    let words: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .collect();
    words
        .iter()
        .any(|w| matches!(*w, "woke" | "wake" | "waking"))
        || words.windows(2).any(|pair| pair == ["got", "up"])
}
