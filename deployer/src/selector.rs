//! Host selection
//!
//! Turns the evaluated host list into the ordered, bounded set a command
//! operates on. The stages are applied in a fixed order:
//! match -> tag filter -> order -> window.

use globset::Glob;
use tracing::info;

use crate::app::options::SelectOptions;
use crate::errors::FleetError;
use crate::models::{Deployment, Host};

/// Keep hosts whose name matches a shell glob
pub fn match_by_name(hosts: &[Host], pattern: &str) -> Result<Vec<Host>, FleetError> {
    let matcher = Glob::new(pattern)
        .map_err(|e| FleetError::SelectionError(format!("invalid glob '{}': {}", pattern, e)))?
        .compile_matcher();

    Ok(hosts
        .iter()
        .filter(|host| matcher.is_match(&host.name))
        .cloned()
        .collect())
}

/// Keep hosts carrying every one of `required` tags
pub fn filter_by_tags(hosts: Vec<Host>, required: &[String]) -> Vec<Host> {
    if required.is_empty() {
        return hosts;
    }

    hosts
        .into_iter()
        .filter(|host| required.iter().all(|tag| host.has_tag(tag)))
        .collect()
}

/// Stable multi-pass bucket ordering.
///
/// Hosts carrying the first ordering tag come first, then hosts carrying the
/// second one among the rest, and so on. Relative input order is kept
/// inside every bucket and in the untagged remainder.
pub fn order_by_tags(hosts: Vec<Host>, ordering: &[String]) -> Vec<Host> {
    let mut ordered = Vec::with_capacity(hosts.len());
    let mut remaining = hosts;

    for tag in ordering {
        let (tagged, rest): (Vec<Host>, Vec<Host>) =
            remaining.into_iter().partition(|host| host.has_tag(tag));
        ordered.extend(tagged);
        remaining = rest;
    }

    ordered.extend(remaining);
    ordered
}

/// Skip the first `skip` hosts, keep every `stride`-th of the rest and cap
/// the result at `limit` (0 = no cap)
pub fn window(hosts: Vec<Host>, skip: usize, stride: usize, limit: usize) -> Vec<Host> {
    if skip >= hosts.len() {
        return Vec::new();
    }

    let stride = stride.max(1);
    let mut selected: Vec<Host> = hosts.into_iter().skip(skip).step_by(stride).collect();

    if limit > 0 && limit < selected.len() {
        selected.truncate(limit);
    }

    selected
}

/// Run the whole selection pipeline over a deployment and report the result
pub fn select_hosts(deployment: &Deployment, options: &SelectOptions) -> Result<Vec<Host>, FleetError> {
    let all = &deployment.hosts;

    let matching = match_by_name(all, &options.glob)?;
    let matching_count = matching.len();

    let tagged = filter_by_tags(matching, &options.tags);

    let ordering = if options.ordering_tags.is_empty() {
        &deployment.meta.ordering.tags
    } else {
        &options.ordering_tags
    };
    let sorted = order_by_tags(tagged, ordering);

    let selected = window(sorted, options.skip, options.every, options.limit);

    info!(
        "Selected {}/{} hosts (name filter:-{}, limits:-{}):",
        selected.len(),
        all.len(),
        all.len() - matching_count,
        matching_count - selected.len(),
    );
    for (index, host) in selected.iter().enumerate() {
        info!("\t{:3}: {}", index, host.summary());
    }

    Ok(selected)
}
