//! Step progression: locating the visited page among a group's steps and
//! moving the participant's position pointer forward.
//!
//! A visited URL matches a step when their paths agree (query, fragment and
//! trailing slashes ignored) and every parameter the step declares appears
//! with the same value on the visited URL. Extra parameters are ignored.

use cohort_core::experiment::Step;
use cohort_core::types::{Participant, ParticipantStatus, Properties};
use std::collections::HashMap;
use url::form_urlencoded;

use crate::placeholders::resolve_str;

/// A URL split into its comparable parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUrl {
    pub base: String,
    pub query: HashMap<String, String>,
}

/// Where a participant stands in their group's funnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    /// Resolved URL of the step to visit next.
    Step(String),
    /// No steps remain, or the participant already completed.
    Finished,
}

pub fn normalize(url: &str) -> NormalizedUrl {
    let without_fragment = url.split_once('#').map_or(url, |(head, _)| head);
    let (base, query) = without_fragment
        .split_once('?')
        .unwrap_or((without_fragment, ""));
    NormalizedUrl {
        base: base.trim_end_matches('/').to_string(),
        query: form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect(),
    }
}

/// Indices to try: the current step, the next one, then every step in order.
pub fn search_order(current: usize, len: usize) -> Vec<usize> {
    let mut order = Vec::with_capacity(len);
    for index in [current, current.saturating_add(1)].into_iter().chain(0..len) {
        if index < len && !order.contains(&index) {
            order.push(index);
        }
    }
    order
}

/// Number of declared parameters when `step` matches `visited`.
fn match_step(step: &Step, visited: &NormalizedUrl, properties: &Properties) -> Option<usize> {
    let target = normalize(&resolve_str(step.url(), properties));
    if target.base != visited.base {
        return None;
    }

    let mut declared = target.query;
    if let Some(implicit) = step.implicit_query() {
        for (name, value) in implicit {
            declared.insert(name.clone(), resolve_str(value, properties));
        }
    }

    declared
        .iter()
        .all(|(name, value)| visited.query.get(name) == Some(value))
        .then_some(declared.len())
}

/// Index of the step `current_url` corresponds to.
///
/// The step declaring the most parameters wins; equally specific matches
/// resolve to the earliest index in [`search_order`].
pub fn find_matching_step(
    steps: &[Step],
    current_index: usize,
    current_url: &str,
    properties: &Properties,
) -> Option<usize> {
    let visited = normalize(current_url);
    let mut best: Option<(usize, usize)> = None;
    for index in search_order(current_index, steps.len()) {
        let Some(declared) = match_step(&steps[index], &visited, properties) else {
            continue;
        };
        if best.map_or(true, |(_, most)| declared > most) {
            best = Some((index, declared));
        }
    }
    best.map(|(index, _)| index)
}

/// Move past step `matched`. The pointer never moves backwards.
pub fn advance(participant: &mut Participant, matched: usize) {
    participant.current_step_index = participant.current_step_index.max(matched + 1);
}

pub fn position(steps: &[Step], participant: &Participant, properties: &Properties) -> Position {
    if participant.status == ParticipantStatus::Completed {
        return Position::Finished;
    }
    match steps.get(participant.current_step_index) {
        Some(step) => Position::Step(resolve_str(step.url(), properties)),
        None => Position::Finished,
    }
}
