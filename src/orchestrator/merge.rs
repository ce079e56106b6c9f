//! Candidate merger: reduce competing backend outputs for one unit to one.
//!
//! `prefer_first`, `prefer_backend` and `vote` are pure functions over the
//! candidate list. `llm_arbitrate` asks a designated backend to pick or
//! synthesise the answer and degrades to `prefer_first` when that fails.
//! A merge either accepts non-empty content or returns [`MergeError`].

use super::fallback::CallContext;
use super::retry;
use crate::error::{MergeError, Pdf2MdError};
use crate::output::BackendCandidate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Similarity a candidate needs with a group's representative to join it.
pub const DEFAULT_VOTE_THRESHOLD: f64 = 0.9;

fn default_threshold() -> f64 {
    DEFAULT_VOTE_THRESHOLD
}

/// How competing candidates are reduced to one.
///
/// In TOML the variant is selected by `policy`:
///
/// ```toml
/// [merge_policy]
/// policy = "prefer_backend"
/// backend = "cloud"
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MergePolicy {
    /// First successful candidate in invocation order.
    #[default]
    PreferFirst,
    /// The named backend's candidate if it succeeded, else `prefer_first`.
    PreferBackend { backend: String },
    /// Largest group of near-identical candidates wins.
    Vote {
        #[serde(default = "default_threshold")]
        threshold: f64,
    },
    /// A backend arbitrates between the candidates.
    LlmArbitrate { arbiter: String },
}

impl MergePolicy {
    pub fn validate(&self) -> Result<(), Pdf2MdError> {
        match self {
            MergePolicy::Vote { threshold } if !(0.0..=1.0).contains(threshold) => {
                Err(Pdf2MdError::InvalidConfig(format!(
                    "vote threshold must be within 0.0–1.0, got {threshold}"
                )))
            }
            MergePolicy::PreferBackend { backend: name } | MergePolicy::LlmArbitrate { arbiter: name }
                if name.trim().is_empty() =>
            {
                Err(Pdf2MdError::InvalidConfig(
                    "merge policy names an empty backend".into(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Backend the policy refers to by name, if any.
    pub fn referenced_backend(&self) -> Option<&str> {
        match self {
            MergePolicy::PreferBackend { backend } => Some(backend),
            MergePolicy::LlmArbitrate { arbiter } => Some(arbiter),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MergePolicy::PreferFirst => "prefer_first",
            MergePolicy::PreferBackend { .. } => "prefer_backend",
            MergePolicy::Vote { .. } => "vote",
            MergePolicy::LlmArbitrate { .. } => "llm_arbitrate",
        }
    }
}

/// Content accepted for a unit after merging.
#[derive(Debug, Clone, PartialEq)]
pub struct Accepted {
    pub content: String,
    /// Backend credited with the content (the arbiter when it synthesised).
    pub backend: String,
    /// Tokens spent by arbitration on top of the candidates' own.
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl Accepted {
    pub fn from_candidate(c: &BackendCandidate) -> Self {
        Self {
            content: c.content.clone(),
            backend: c.backend_name.clone(),
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

fn successes(candidates: &[BackendCandidate]) -> impl Iterator<Item = &BackendCandidate> {
    candidates
        .iter()
        .filter(|c| c.is_success() && !c.content.trim().is_empty())
}

fn no_success(candidates: &[BackendCandidate]) -> MergeError {
    MergeError::NoSuccessfulCandidates {
        attempted: candidates.len(),
    }
}

/// First successful candidate in invocation order.
pub fn prefer_first(candidates: &[BackendCandidate]) -> Result<&BackendCandidate, MergeError> {
    successes(candidates).next().ok_or_else(|| no_success(candidates))
}

/// `backend`'s successful candidate, else the first other success.
pub fn prefer_backend<'a>(
    candidates: &'a [BackendCandidate],
    backend: &str,
) -> Result<&'a BackendCandidate, MergeError> {
    successes(candidates)
        .find(|c| c.backend_name == backend)
        .map_or_else(|| prefer_first(candidates), Ok)
}

/// Group successful candidates by similarity and return the representative
/// of the largest group. Ties go to the group formed first.
///
/// Each candidate joins the first group whose representative is at least
/// `threshold` similar (see [`similarity`]); otherwise it starts a group.
pub fn vote(candidates: &[BackendCandidate], threshold: f64) -> Result<&BackendCandidate, MergeError> {
    vote_index(candidates, threshold).map(|i| &candidates[i])
}

fn vote_index(candidates: &[BackendCandidate], threshold: f64) -> Result<usize, MergeError> {
    // (representative index, normalised representative text, members)
    let mut groups: Vec<(usize, String, usize)> = Vec::new();

    for (index, candidate) in candidates.iter().enumerate() {
        if !candidate.is_success() || candidate.content.trim().is_empty() {
            continue;
        }
        let text = normalize(&candidate.content);
        match groups
            .iter_mut()
            .find(|(_, rep, _)| similarity_normalized(rep, &text) >= threshold)
        {
            Some(group) => group.2 += 1,
            None => groups.push((index, text, 1)),
        }
    }

    let mut best: Option<&(usize, String, usize)> = None;
    for group in &groups {
        if best.is_none_or(|b| group.2 > b.2) {
            best = Some(group);
        }
    }
    debug!(
        "vote: {} group(s), sizes {:?}",
        groups.len(),
        groups.iter().map(|g| g.2).collect::<Vec<_>>()
    );
    best.map(|g| g.0).ok_or_else(|| no_success(candidates))
}

/// [`vote`] on the blocking pool. Edit distance is quadratic in page length.
async fn vote_off_runtime(candidates: &[BackendCandidate], threshold: f64) -> Result<usize, MergeError> {
    let owned = candidates.to_vec();
    tokio::task::spawn_blocking(move || vote_index(&owned, threshold))
        .await
        .map_err(|e| MergeError::Aborted {
            detail: e.to_string(),
        })?
}

/// Lowercase and collapse all whitespace runs to one space.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalised Levenshtein similarity in `0.0..=1.0` after [`normalize`].
pub fn similarity(a: &str, b: &str) -> f64 {
    similarity_normalized(&normalize(a), &normalize(b))
}

fn similarity_normalized(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Apply `policy` to the candidates of one unit.
///
/// `ctx` supplies the image, metadata and retry policy for arbitration.
pub async fn merge(
    policy: &MergePolicy,
    candidates: &[BackendCandidate],
    ctx: &CallContext<'_>,
) -> Result<Accepted, MergeError> {
    let accepted = match policy {
        MergePolicy::PreferFirst => Accepted::from_candidate(prefer_first(candidates)?),
        MergePolicy::PreferBackend { backend } => {
            Accepted::from_candidate(prefer_backend(candidates, backend)?)
        }
        MergePolicy::Vote { threshold } => {
            let index = vote_off_runtime(candidates, *threshold).await?;
            Accepted::from_candidate(&candidates[index])
        }
        MergePolicy::LlmArbitrate { arbiter } => arbitrate(arbiter, candidates, ctx).await?,
    };
    debug!(
        "{}: {} accepted content from '{}'",
        ctx.meta.unit_id,
        policy.name(),
        accepted.backend
    );
    Ok(accepted)
}

async fn arbitrate(
    arbiter: &str,
    candidates: &[BackendCandidate],
    ctx: &CallContext<'_>,
) -> Result<Accepted, MergeError> {
    let first = prefer_first(candidates)?;
    let contents: Vec<String> = successes(candidates).map(|c| c.content.clone()).collect();
    if contents.len() == 1 {
        return Ok(Accepted::from_candidate(first));
    }

    let Some(backend) = ctx.backends.get(arbiter).filter(|b| b.is_available()) else {
        warn!(
            "{}: arbiter '{}' unavailable, using first candidate",
            ctx.meta.unit_id, arbiter
        );
        return Ok(Accepted::from_candidate(first));
    };

    let label = format!("{} [{} arbitration]", ctx.meta.unit_id, arbiter);
    let outcome = retry::execute(ctx.policy, &label, ctx.cancel, || {
        backend.arbitrate(ctx.image, ctx.meta, &contents)
    })
    .await;

    match outcome.result {
        Ok(extraction) if !extraction.content.trim().is_empty() => {
            info!(
                "{}: arbiter '{}' chose among {} candidates",
                ctx.meta.unit_id,
                arbiter,
                contents.len()
            );
            Ok(Accepted {
                content: extraction.content,
                backend: arbiter.to_string(),
                input_tokens: extraction.input_tokens,
                output_tokens: extraction.output_tokens,
            })
        }
        Ok(_) => {
            warn!(
                "{}: arbiter '{}' returned nothing, using first candidate",
                ctx.meta.unit_id, arbiter
            );
            Ok(Accepted::from_candidate(first))
        }
        Err(e) => {
            warn!(
                "{}: arbitration by '{}' failed — {}; using first candidate",
                ctx.meta.unit_id, arbiter, e
            );
            Ok(Accepted::from_candidate(first))
        }
    }
}
