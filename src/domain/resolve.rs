//! Dependency resolution
//!
//! Turns a plugin's `use` list into a [`ResolutionPlan`]: for every required
//! slot, the provider that was chosen and that provider's own plan.
//!
//! The search is depth-first and greedy. Candidates for a slot are tried in
//! provider-index order and the first one whose own subtree resolves is
//! committed; there is no backtracking across sibling slots. Cycles are
//! detected per root-to-node path, so the same provider may appear in
//! several branches.
//!
//! A failed subtree is remembered together with the ancestors its cycle
//! rejections ran into. While all of those ancestors are still on the path
//! the failure is reused instead of searched again, which keeps cyclic
//! declarations from blowing up the number of attempts.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use super::registry::ProviderIndex;
use super::spec::PluginSpec;

#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("no plugin provides '{slot}' (used by '{requester}')")]
    NoProvider { slot: String, requester: String },

    #[error("circular dependency {}", chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    #[error(
        "all {} plugins providing '{slot}' (used by '{requester}') can't be resolved: {}",
        candidates.len(),
        join_causes(causes)
    )]
    Unsatisfiable {
        slot: String,
        requester: String,
        candidates: Vec<String>,
        causes: Vec<ResolveError>,
    },

    #[error("unmet requirements: {}", format_unmet(missing))]
    Unmet { missing: Vec<(String, Vec<String>)> },
}

fn join_causes(causes: &[ResolveError]) -> String {
    causes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_unmet(missing: &[(String, Vec<String>)]) -> String {
    missing
        .iter()
        .map(|(slot, from)| format!("'{}' (from {})", slot, from.join(", ")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The provider chosen for one required slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotChoice {
    pub slot: String,
    pub provider: String,
    pub plan: ResolutionPlan,
}

/// Nested record of chosen providers, one per required slot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionPlan {
    slots: Vec<SlotChoice>,
}

impl ResolutionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a choice for `slot`
    pub fn push(&mut self, slot: impl Into<String>, provider: impl Into<String>, plan: ResolutionPlan) {
        self.slots.push(SlotChoice {
            slot: slot.into(),
            provider: provider.into(),
            plan,
        });
    }

    /// Choices in the order the slots were required
    pub fn choices(&self) -> &[SlotChoice] {
        &self.slots
    }

    pub fn get(&self, slot: &str) -> Option<&SlotChoice> {
        self.slots.iter().find(|c| c.slot == slot)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Every distinct provider anywhere in the tree, in pre-order
    pub fn providers(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_providers(&mut out);
        out
    }

    fn collect_providers<'p>(&'p self, out: &mut Vec<&'p str>) {
        for choice in &self.slots {
            if !out.contains(&choice.provider.as_str()) {
                out.push(&choice.provider);
            }
            choice.plan.collect_providers(out);
        }
    }
}

/// Counters for one or more resolutions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// Recursive visits, including the root
    pub attempts: usize,
    /// Candidate subtrees that failed and were skipped
    pub rejected: usize,
    pub elapsed: Duration,
}

/// A successful resolution and how much work it took
#[derive(Debug, Clone)]
pub struct Resolved {
    pub plan: ResolutionPlan,
    pub stats: ResolveStats,
}

/// A failed visit and the path names its cycle rejections hit
#[derive(Debug, Clone)]
struct Rejection {
    error: ResolveError,
    cycles: BTreeSet<String>,
}

/// Depth-first, first-success resolver over a provider index
pub struct Resolver<'i, 'a> {
    providers: &'i ProviderIndex<'a>,
    stats: ResolveStats,
    failures: HashMap<String, Rejection>,
}

impl<'i, 'a> Resolver<'i, 'a> {
    pub fn new(providers: &'i ProviderIndex<'a>) -> Self {
        Self {
            providers,
            stats: ResolveStats::default(),
            failures: HashMap::new(),
        }
    }

    /// Counters accumulated over every call to [`Resolver::resolve`]
    pub fn stats(&self) -> ResolveStats {
        self.stats
    }

    /// Resolves the `use` list of `target`
    pub fn resolve(&mut self, target: &PluginSpec) -> Result<ResolutionPlan, ResolveError> {
        let start = Instant::now();
        let before = self.stats;
        let result = self
            .visit(target, target, Vec::new())
            .map_err(|rejection| rejection.error);
        self.stats.elapsed += start.elapsed();

        let attempts = self.stats.attempts - before.attempts;
        let rejected = self.stats.rejected - before.rejected;
        match &result {
            Ok(_) => tracing::info!(
                "resolution of '{}' complete in {:?}: {} attempts, tried {} invalid chains",
                target.name(),
                start.elapsed(),
                attempts,
                rejected
            ),
            Err(e) => tracing::warn!(
                "resolution of '{}' failed after {} attempts: {}",
                target.name(),
                attempts,
                e
            ),
        }
        result
    }

    fn visit(
        &mut self,
        target: &PluginSpec,
        current: &PluginSpec,
        mut visited: Vec<String>,
    ) -> Result<ResolutionPlan, Rejection> {
        self.stats.attempts += 1;

        if visited.iter().any(|name| name == current.name()) {
            visited.push(current.name().to_string());
            tracing::debug!(
                "while resolving '{}' for '{}': circular dependency {}",
                current.name(),
                target.name(),
                visited.join(" -> ")
            );
            return Err(Rejection {
                error: ResolveError::Cycle { chain: visited },
                cycles: BTreeSet::from([current.name().to_string()]),
            });
        }

        if let Some(known) = self.failures.get(current.name()) {
            if known.cycles.iter().all(|name| visited.contains(name)) {
                tracing::debug!("'{}' already failed on this path", current.name());
                return Err(known.clone());
            }
        }

        visited.push(current.name().to_string());
        let result = self.visit_uses(target, current, &visited);

        if let Err(rejection) = &result {
            let mut known = rejection.clone();
            known.cycles.remove(current.name());
            self.failures.insert(current.name().to_string(), known);
        }
        result
    }

    fn visit_uses(
        &mut self,
        target: &PluginSpec,
        current: &PluginSpec,
        visited: &[String],
    ) -> Result<ResolutionPlan, Rejection> {
        let providers = self.providers;
        let mut plan = ResolutionPlan::new();
        for slot in current.uses() {
            let candidates = providers.providers(slot);
            if candidates.is_empty() {
                return Err(Rejection {
                    error: ResolveError::NoProvider {
                        slot: slot.clone(),
                        requester: current.name().to_string(),
                    },
                    cycles: BTreeSet::new(),
                });
            }

            let mut causes = Vec::new();
            let mut cycles = BTreeSet::new();
            let mut chosen = None;
            for (i, provider) in candidates.iter().enumerate() {
                if i > 0 {
                    tracing::debug!(
                        "attempt #{}: resolve '{}' dependency with '{}'",
                        i + 1,
                        slot,
                        provider.name()
                    );
                }
                match self.visit(target, provider, visited.to_vec()) {
                    Ok(sub) => {
                        chosen = Some((provider.name(), sub));
                        break;
                    }
                    Err(rejection) => {
                        self.stats.rejected += 1;
                        cycles.extend(rejection.cycles);
                        causes.push(rejection.error);
                    }
                }
            }

            match chosen {
                Some((provider, sub)) => plan.push(slot.as_str(), provider, sub),
                None => {
                    tracing::debug!(
                        "no plugin providing '{}' (used by {}) can resolve when starting with {}",
                        slot,
                        current.name(),
                        target.name()
                    );
                    return Err(Rejection {
                        error: ResolveError::Unsatisfiable {
                            slot: slot.clone(),
                            requester: current.name().to_string(),
                            candidates: candidates.iter().map(|p| p.name().to_string()).collect(),
                            causes,
                        },
                        cycles,
                    });
                }
            }
        }

        Ok(plan)
    }
}

/// Resolves the requirements of `target` against `providers`
pub fn resolve(target: &PluginSpec, providers: &ProviderIndex<'_>) -> Result<Resolved, ResolveError> {
    let mut resolver = Resolver::new(providers);
    let plan = resolver.resolve(target)?;
    Ok(Resolved {
        plan,
        stats: resolver.stats(),
    })
}

/// Resolves a requirement list that no single plugin owns.
///
/// `reason` names the requester in diagnostics, e.g. `preprocess`.
pub fn resolve_requirements(
    reason: &str,
    requirements: &[String],
    providers: &ProviderIndex<'_>,
) -> Result<Resolved, ResolveError> {
    let root = PluginSpec::virtual_root(reason, requirements.iter().cloned());
    resolve(&root, providers)
}
