use float_ord::FloatOrd;

use crate::TextToken;

/// Share of the shorter box's height two boxes must overlap vertically to sit on one line.
const MIN_LINE_OVERLAP: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct Line<'a> {
    pub tokens: Vec<&'a TextToken>,
    top: f32,
    bottom: f32,
}

impl<'a> Line<'a> {
    fn new(token: &'a TextToken) -> Self {
        Self {
            tokens: vec![token],
            top: token.bounds.y,
            bottom: token.bounds.bottom(),
        }
    }

    fn overlap(&self, token: &TextToken) -> f32 {
        let shared = self.bottom.min(token.bounds.bottom()) - self.top.max(token.bounds.y);
        let shorter = (self.bottom - self.top).min(token.bounds.height);
        if shorter <= 0.0 {
            return 0.0;
        }
        shared.max(0.0) / shorter
    }

    fn push(&mut self, token: &'a TextToken) {
        self.top = self.top.min(token.bounds.y);
        self.bottom = self.bottom.max(token.bounds.bottom());
        self.tokens.push(token);
    }

    pub fn text(&self) -> String {
        self.tokens
            .iter()
            .map(|it| it.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub fn cluster_lines<'a>(tokens: &[&'a TextToken]) -> Vec<Line<'a>> {
    let mut sorted = tokens.to_vec();
    sorted.sort_by_key(|it| (FloatOrd(it.bounds.center_y()), FloatOrd(it.bounds.x)));

    let mut lines: Vec<Line<'a>> = Vec::new();
    for token in sorted {
        let best = lines
            .iter_mut()
            .map(|line| {
                let overlap = line.overlap(token);
                (line, overlap)
            })
            .filter(|(_, overlap)| *overlap >= MIN_LINE_OVERLAP)
            .max_by_key(|(_, overlap)| FloatOrd(*overlap));
        match best {
            Some((line, _)) => line.push(token),
            None => lines.push(Line::new(token)),
        }
    }

    for line in &mut lines {
        line.tokens.sort_by_key(|it| FloatOrd(it.bounds.x));
    }
    lines.sort_by_key(|line| FloatOrd(line.top));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoundingBox;

    fn token(text: &str, x: f32, y: f32) -> TextToken {
        TextToken::new(text, BoundingBox::new(x, y, 20.0, 16.0), 0.9)
    }

    fn texts(lines: &[Line]) -> Vec<String> {
        lines.iter().map(Line::text).collect()
    }

    #[test]
    fn groups_by_vertical_overlap() {
        let tokens = [
            token("11", 40.0, 52.0),
            token("后区", 0.0, 90.0),
            token("03", 10.0, 50.0),
            token("08", 60.0, 93.0),
            token("19", 70.0, 48.0),
        ];
        let refs: Vec<_> = tokens.iter().collect();
        assert_eq!(texts(&cluster_lines(&refs)), ["03 11 19", "后区 08"]);
    }

    #[test]
    fn slight_tilt_stays_on_one_line() {
        let tokens: Vec<_> = (0..5)
            .map(|i| token(&format!("{i}"), i as f32 * 30.0, 100.0 + i as f32 * 3.0))
            .collect();
        let refs: Vec<_> = tokens.iter().collect();
        assert_eq!(cluster_lines(&refs).len(), 1);
    }

    #[test]
    fn empty_input_has_no_lines() {
        assert!(cluster_lines(&[]).is_empty());
    }
}
