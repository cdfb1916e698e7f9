//! Hierarchical quota bookkeeping: capacity (`ClusterHard`) against usage
//! (`ClusterUsed`).
//!
//! Both functions are pure and return a new map. Callers always subtract
//! the value they cached when they last added, never the live object, so an
//! add/sub pair cancels exactly even if intermediate updates were missed.

pub mod quantity;

use crate::api::v1::resources::{ClusterHard, ClusterUsed, ResourceList};
use crate::error::Result;
use quantity::{Amount, Format};

/// `used[cluster][resource] += delta[cluster][resource]`, creating missing
/// clusters and resources at zero.
pub fn add_cluster_hard_to_used(used: &ClusterUsed, delta: &ClusterHard) -> Result<ClusterUsed> {
    let mut result = used.clone();
    for (cluster, hard) in delta {
        let entry = result.entry(cluster.clone()).or_default();
        entry.used = add_resource_list(&entry.used, &hard.hard)?;
    }
    Ok(result)
}

/// `used[cluster][resource] -= needed[cluster][resource]` wherever the
/// cluster and resource already exist in `used`; everything else is
/// skipped.
pub fn sub_cluster_hard_from_used(used: &ClusterUsed, needed: &ClusterHard) -> Result<ClusterUsed> {
    let mut result = used.clone();
    for (cluster, hard) in needed {
        if let Some(entry) = result.get_mut(cluster) {
            entry.used = sub_resource_list(&entry.used, &hard.hard)?;
        }
    }
    Ok(result)
}

pub fn add_resource_list(base: &ResourceList, delta: &ResourceList) -> Result<ResourceList> {
    let mut result = base.clone();
    for (name, quantity) in delta {
        let delta = Amount::try_from(quantity)?;
        let current = match result.get(name) {
            Some(q) => Amount::try_from(q)?,
            None => Amount::zero(delta_format(&delta)),
        };
        result.insert(name.clone(), current.add(delta)?.to_quantity());
    }
    Ok(result)
}

pub fn sub_resource_list(base: &ResourceList, needed: &ResourceList) -> Result<ResourceList> {
    let mut result = base.clone();
    for (name, quantity) in needed {
        if let Some(current) = result.get(name) {
            let current = Amount::try_from(current)?;
            let needed = Amount::try_from(quantity)?;
            result.insert(name.clone(), current.sub(needed)?.to_quantity());
        }
    }
    Ok(result)
}

/// A fresh entry takes the suffix family of the first value added to it.
fn delta_format(delta: &Amount) -> Format {
    if delta.to_string().ends_with('i') {
        Format::BinarySI
    } else {
        Format::DecimalSI
    }
}

/// Parses every quantity in `list`, reporting the first malformed one.
pub fn validate_resource_list(list: &ResourceList) -> Result<()> {
    for quantity in list.values() {
        Amount::try_from(quantity)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1::resources::{HardQuantity, UsedQuantity};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use rstest::rstest;

    fn list(pairs: &[(&str, &str)]) -> ResourceList {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
            .collect()
    }

    fn hard(cluster: &str, pairs: &[(&str, &str)]) -> ClusterHard {
        ClusterHard::from([(cluster.to_string(), HardQuantity { hard: list(pairs) })])
    }

    fn used(cluster: &str, pairs: &[(&str, &str)]) -> ClusterUsed {
        ClusterUsed::from([(cluster.to_string(), UsedQuantity { used: list(pairs) })])
    }

    #[test]
    fn add_creates_missing_entries() {
        let result = add_cluster_hard_to_used(&ClusterUsed::new(), &hard("cls1", &[("cpu", "1")]))
            .unwrap();
        assert_eq!(result, used("cls1", &[("cpu", "1")]));
    }

    #[test]
    fn add_accumulates() {
        let start = used("cls1", &[("cpu", "1"), ("memory", "1Gi")]);
        let result =
            add_cluster_hard_to_used(&start, &hard("cls1", &[("cpu", "500m"), ("memory", "1Gi")]))
                .unwrap();
        assert_eq!(result, used("cls1", &[("cpu", "1500m"), ("memory", "2Gi")]));
        // input untouched
        assert_eq!(start, used("cls1", &[("cpu", "1"), ("memory", "1Gi")]));
    }

    #[test]
    fn sub_skips_absent_clusters_and_resources() {
        let start = used("cls1", &[("cpu", "2")]);
        let mut needed = hard("cls1", &[("cpu", "1"), ("memory", "1Gi")]);
        needed.extend(hard("cls2", &[("cpu", "4")]));
        let result = sub_cluster_hard_from_used(&start, &needed).unwrap();
        assert_eq!(result, used("cls1", &[("cpu", "1")]));
    }

    #[rstest]
    #[case(used("cls1", &[("cpu", "3")]), hard("cls1", &[("cpu", "1")]))]
    #[case(used("cls1", &[("cpu", "250m"), ("memory", "3Gi")]), hard("cls1", &[("cpu", "1"), ("memory", "512Mi")]))]
    #[case(ClusterUsed::new(), hard("cls1", &[("pods", "10")]))]
    #[case(used("cls1", &[("cpu", "1")]), hard("cls2", &[("cpu", "7")]))]
    fn add_then_sub_round_trips(#[case] start: ClusterUsed, #[case] delta: ClusterHard) {
        let added = add_cluster_hard_to_used(&start, &delta).unwrap();
        let back = sub_cluster_hard_from_used(&added, &delta).unwrap();
        for (cluster, entry) in &start {
            for (resource, quantity) in &entry.used {
                let got = Amount::try_from(&back[cluster].used[resource]).unwrap();
                assert_eq!(got, Amount::try_from(quantity).unwrap().add(Amount::zero(got_format(&got))).unwrap());
            }
        }
        // entries introduced by the add come back to zero
        for (cluster, h) in &delta {
            for resource in h.hard.keys() {
                let present_before = start.get(cluster).is_some_and(|u| u.used.contains_key(resource));
                if !present_before {
                    assert!(Amount::try_from(&back[cluster].used[resource]).unwrap().is_zero());
                }
            }
        }
    }

    fn got_format(a: &Amount) -> Format {
        if a.to_string().ends_with('i') {
            Format::BinarySI
        } else {
            Format::DecimalSI
        }
    }

    #[test]
    fn malformed_quantity_is_reported() {
        let err = add_cluster_hard_to_used(&ClusterUsed::new(), &hard("cls1", &[("cpu", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("lots"));
    }
}
