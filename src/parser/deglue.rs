use super::{lines::Line, Position};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitRun {
    pub digits: String,
    pub start: Position,
}

pub fn digit_runs(line: &Line) -> Vec<DigitRun> {
    let mut runs = Vec::new();
    let mut current: Option<DigitRun> = None;
    for (token_index, token) in line.tokens.iter().enumerate() {
        for (offset, ch) in token.text.char_indices() {
            match to_ascii_digit(ch) {
                Some(digit) => current
                    .get_or_insert_with(|| DigitRun {
                        digits: String::new(),
                        start: Position {
                            token: token_index,
                            offset,
                        },
                    })
                    .digits
                    .push(digit),
                None => runs.extend(current.take()),
            }
        }
    }
    runs.extend(current);
    runs
}

fn to_ascii_digit(ch: char) -> Option<char> {
    match ch {
        '0'..='9' => Some(ch),
        '０'..='９' => char::from_u32(ch as u32 - '０' as u32 + '0' as u32),
        _ => None,
    }
}

/// Splits a run into numbers, keeping only those `valid` accepts.
///
/// Even runs split into consecutive pairs. Odd runs are tried as a single digit
/// followed by pairs and as pairs followed by a single digit; the split where
/// every group is valid wins, then the one with more valid groups, and on a
/// tie the single-digit-first split.
pub fn deglue(digits: &str, valid: impl Fn(u8) -> bool) -> Vec<u8> {
    let bytes = digits.as_bytes();
    let groups = match bytes.len() {
        0 => return Vec::new(),
        1 => vec![number(bytes)],
        n if n % 2 == 0 => pairs(bytes),
        _ => {
            let single_first: Vec<u8> = std::iter::once(number(&bytes[..1]))
                .chain(pairs(&bytes[1..]))
                .collect();
            let single_last: Vec<u8> = pairs(&bytes[..bytes.len() - 1])
                .into_iter()
                .chain(std::iter::once(number(&bytes[bytes.len() - 1..])))
                .collect();
            let score = |groups: &[u8]| {
                let valid_count = groups.iter().filter(|it| valid(**it)).count();
                (valid_count == groups.len(), valid_count)
            };
            if score(&single_first) >= score(&single_last) {
                single_first
            } else {
                log::trace!("Deglued {digits} with the single digit last");
                single_last
            }
        }
    };
    groups.into_iter().filter(|it| valid(*it)).collect()
}

fn pairs(bytes: &[u8]) -> Vec<u8> {
    bytes.chunks(2).map(number).collect()
}

fn number(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc * 10 + (b - b'0'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoundingBox, TextToken};

    fn in_ticket_range(n: u8) -> bool {
        (1..=35).contains(&n)
    }

    fn runs_of(texts: &[&str]) -> Vec<String> {
        let tokens: Vec<_> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| TextToken::new(*text, BoundingBox::new(i as f32 * 30.0, 0.0, 20.0, 10.0), 0.9))
            .collect();
        let refs: Vec<_> = tokens.iter().collect();
        let line = &super::super::lines::cluster_lines(&refs)[0];
        digit_runs(line).into_iter().map(|it| it.digits).collect()
    }

    #[test]
    fn even_runs_split_into_pairs() {
        assert_eq!(deglue("0304", in_ticket_range), [3, 4]);
        assert_eq!(deglue("151229", in_ticket_range), [15, 12, 29]);
    }

    #[test]
    fn single_digit_stands_alone() {
        assert_eq!(deglue("5", in_ticket_range), [5]);
        assert!(deglue("0", in_ticket_range).is_empty());
    }

    #[test]
    fn odd_runs_prefer_fully_valid_split() {
        assert_eq!(deglue("51229", in_ticket_range), [5, 12, 29]);
        assert_eq!(deglue("12295", in_ticket_range), [12, 29, 5]);
    }

    #[test]
    fn odd_run_tie_puts_single_digit_first() {
        // 1|12|19 and 11|21|9 are both valid.
        assert_eq!(deglue("11219", in_ticket_range), [1, 12, 19]);
    }

    #[test]
    fn invalid_groups_are_discarded() {
        assert_eq!(deglue("0399", in_ticket_range), [3]);
        // 9|94|07 has two valid groups, 99|40|7 only one.
        assert_eq!(deglue("99407", in_ticket_range), [9, 7]);
    }

    #[test]
    fn runs_continue_across_tokens() {
        assert_eq!(runs_of(&["03", "11", "19"]), ["031119"]);
        assert_eq!(runs_of(&["03 11", "+", "05"]), ["03", "11", "05"]);
        assert_eq!(runs_of(&["前区03", "1"]), ["031"]);
    }

    #[test]
    fn full_width_digits_are_digits() {
        assert_eq!(runs_of(&["０３", "１１"]), ["0311"]);
    }

    #[test]
    fn run_positions_point_at_first_digit() {
        let token = TextToken::new("前区 07", BoundingBox::new(0.0, 0.0, 50.0, 10.0), 0.9);
        let line = &super::super::lines::cluster_lines(&[&token])[0];
        let runs = digit_runs(line);
        assert_eq!(
            runs[0].start,
            Position {
                token: 0,
                offset: "前区 ".len()
            }
        );
    }
}
