use std::{fmt, ops::RangeInclusive, sync::LazyLock};

use regex::Regex;

use super::{lines::Line, Position};

pub const FRONT_RANGE: RangeInclusive<u8> = 1..=35;
pub const BACK_RANGE: RangeInclusive<u8> = 1..=12;
pub const FRONT_COUNT: usize = 5;
pub const BACK_COUNT: usize = 2;

static FRONT_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)前\s*区|红\s*球|\bfront\b").expect("front marker regex"));
static BACK_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[后後]\s*区|蓝\s*球|\bback\b").expect("back marker regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Front,
    Back,
}

impl Zone {
    pub fn range(self) -> RangeInclusive<u8> {
        match self {
            Zone::Front => FRONT_RANGE,
            Zone::Back => BACK_RANGE,
        }
    }

    fn only_for(value: u8) -> Option<Self> {
        match (FRONT_RANGE.contains(&value), BACK_RANGE.contains(&value)) {
            (true, false) => Some(Zone::Front),
            (false, true) => Some(Zone::Back),
            _ => None,
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Zone::Front => "front",
            Zone::Back => "back",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    pub zone: Zone,
    pub at: Position,
}

pub fn find_markers(line: &Line) -> Vec<Marker> {
    let mut markers = Vec::new();
    for (token, it) in line.tokens.iter().enumerate() {
        for (zone, regex) in [(Zone::Front, &*FRONT_MARKER), (Zone::Back, &*BACK_MARKER)] {
            markers.extend(regex.find_iter(&it.text).map(|found| Marker {
                zone,
                at: Position {
                    token,
                    offset: found.start(),
                },
            }));
        }
    }
    markers.sort_by_key(|it| it.at);
    markers
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Group {
    pub value: u8,
    pub at: Position,
}

#[derive(Debug, Clone, Default)]
pub struct LineGroups {
    pub groups: Vec<Group>,
    pub markers: Vec<Marker>,
}

impl LineGroups {
    fn single_zone(&self) -> Option<Zone> {
        let first = self.markers.first()?.zone;
        self.markers.iter().all(|it| it.zone == first).then_some(first)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    pub front: Vec<u8>,
    pub back: Vec<u8>,
    pub ambiguous: Vec<u8>,
    /// Values a marker put in a zone whose range does not hold them.
    pub out_of_range: Vec<(Zone, u8)>,
}

// First rule that applies wins for each number:
// 1. a marker earlier on the same line, or on an adjacent number-free line
//    labelling a single zone (previous line first);
// 2. the shape of the line's remaining numbers: 5 front, 2 back, or 7 split 5 + 2;
// 3. a value that fits only one zone's range.
// Marker-assigned values outside their zone's range are reported, never moved.

pub fn assign_zones(lines: &[LineGroups]) -> Assignment {
    let mut zones: Vec<Vec<Option<Zone>>> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            line.groups
                .iter()
                .map(|group| marker_zone(lines, i, group))
                .collect()
        })
        .collect();

    for (line, zones) in lines.iter().zip(zones.iter_mut()) {
        let open: Vec<usize> = (0..zones.len()).filter(|&i| zones[i].is_none()).collect();
        let values: Vec<u8> = open.iter().map(|&i| line.groups[i].value).collect();
        let all_in = |values: &[u8], range: &RangeInclusive<u8>| values.iter().all(|it| range.contains(it));
        let line_zones: Option<Vec<Zone>> = match values.len() {
            FRONT_COUNT if all_in(&values, &FRONT_RANGE) => Some(vec![Zone::Front; FRONT_COUNT]),
            BACK_COUNT if all_in(&values, &BACK_RANGE) => Some(vec![Zone::Back; BACK_COUNT]),
            n if n == FRONT_COUNT + BACK_COUNT
                && all_in(&values[..FRONT_COUNT], &FRONT_RANGE)
                && all_in(&values[FRONT_COUNT..], &BACK_RANGE) =>
            {
                let mut split = vec![Zone::Front; FRONT_COUNT];
                split.extend([Zone::Back; BACK_COUNT]);
                Some(split)
            }
            _ => None,
        };
        if let Some(line_zones) = line_zones {
            for (i, zone) in open.into_iter().zip(line_zones) {
                zones[i] = Some(zone);
            }
        }
    }

    let mut assignment = Assignment::default();
    for (line, zones) in lines.iter().zip(zones) {
        for (group, zone) in line.groups.iter().zip(zones) {
            match zone.or_else(|| Zone::only_for(group.value)) {
                Some(zone) if !zone.range().contains(&group.value) => {
                    assignment.out_of_range.push((zone, group.value))
                }
                Some(Zone::Front) => assignment.front.push(group.value),
                Some(Zone::Back) => assignment.back.push(group.value),
                None => assignment.ambiguous.push(group.value),
            }
        }
    }
    assignment
}

fn marker_zone(lines: &[LineGroups], index: usize, group: &Group) -> Option<Zone> {
    let line = &lines[index];
    if !line.markers.is_empty() {
        return line
            .markers
            .iter()
            .rev()
            .find(|marker| marker.at <= group.at)
            .map(|marker| marker.zone);
    }
    let label_line = |line: &LineGroups| {
        if line.groups.is_empty() {
            line.single_zone()
        } else {
            None
        }
    };
    index
        .checked_sub(1)
        .and_then(|prev| label_line(&lines[prev]))
        .or_else(|| lines.get(index + 1).and_then(label_line))
}
