//! Instance-type selection.
//!
//! Given the allowed catalog and one normalized requirement, pick the
//! entry that satisfies the requirement with the least wasted
//! capacity. Pure functions, no side effects.

use fleetgrid_state::{EC2InstanceType, Resources, ScalingError, ScalingResult};

/// A fit test and score for one catalog entry against one requirement.
/// `None` means the entry cannot host the requirement; otherwise the
/// returned score is the wasted capacity (lower is better).
pub type FitPolicy = fn(&EC2InstanceType, &Resources) -> Option<f64>;

/// Closest-fit: reject entries too small on either axis, score the
/// rest by total relative overshoot (cpu fraction + ram fraction).
/// An exact fit scores 0.0.
pub fn closest_instance_policy(candidate: &EC2InstanceType, need: &Resources) -> Option<f64> {
    if candidate.cpus < need.cpus || candidate.ram < need.ram {
        return None;
    }
    let cpu_excess = if candidate.cpus > 0.0 {
        (candidate.cpus - need.cpus) / candidate.cpus
    } else {
        0.0
    };
    let ram_excess = if candidate.ram > 0 {
        (candidate.ram - need.ram) as f64 / candidate.ram as f64
    } else {
        0.0
    };
    Some(cpu_excess + ram_excess)
}

/// Pick the catalog entry that best fits `need` under `policy`.
///
/// Fails with `Configuration` when the catalog is empty (the pool
/// cannot be sized at all) and with `Ec2InstanceNotFound` when no
/// entry passes the fit test. A request for exactly zero cpus and
/// zero ram is unsatisfiable: no machine "matches" a null requirement.
/// Ties keep the earliest catalog entry.
pub fn find_best_fitting(
    catalog: &[EC2InstanceType],
    need: &Resources,
    policy: FitPolicy,
) -> ScalingResult<EC2InstanceType> {
    if catalog.is_empty() {
        return Err(ScalingError::Configuration(
            "the allowed EC2 instance type catalog is empty".to_string(),
        ));
    }

    let not_found = || ScalingError::Ec2InstanceNotFound {
        cpus: need.cpus,
        ram: need.ram,
    };

    if need.is_empty() {
        return Err(not_found());
    }

    let mut best: Option<(f64, &EC2InstanceType)> = None;
    for candidate in catalog {
        if let Some(score) = policy(candidate, need) {
            match best {
                Some((best_score, _)) if score >= best_score => {}
                _ => best = Some((score, candidate)),
            }
        }
    }

    best.map(|(_, candidate)| candidate.clone()).ok_or_else(not_found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn itype(name: &str, cpus: f64, ram: u64) -> EC2InstanceType {
        EC2InstanceType {
            name: name.to_string(),
            cpus,
            ram,
        }
    }

    #[test]
    fn exact_fit_wins_across_a_uniform_catalog() {
        let catalog: Vec<_> = (1..=29)
            .map(|n| itype(&format!("type-{n}"), n as f64, n))
            .collect();

        for n in 1..=29u64 {
            let chosen =
                find_best_fitting(&catalog, &Resources::new(n as f64, n), closest_instance_policy)
                    .unwrap();
            assert_eq!(chosen.cpus, n as f64);
            assert_eq!(chosen.ram, n);
        }
    }

    #[test]
    fn empty_catalog_is_a_configuration_error() {
        let err =
            find_best_fitting(&[], &Resources::new(1.0, 1024), closest_instance_policy)
                .unwrap_err();
        assert!(matches!(err, ScalingError::Configuration(_)));
    }

    #[test]
    fn zero_request_is_unsatisfiable() {
        let catalog = vec![itype("t2.micro", 1.0, 1 << 30)];
        let err = find_best_fitting(&catalog, &Resources::none(), closest_instance_policy)
            .unwrap_err();
        assert!(matches!(err, ScalingError::Ec2InstanceNotFound { .. }));
    }

    #[test]
    fn oversized_request_is_not_found() {
        let catalog = vec![itype("t2.micro", 1.0, 1 << 30)];
        let err = find_best_fitting(
            &catalog,
            &Resources::new(64.0, 512 << 30),
            closest_instance_policy,
        )
        .unwrap_err();
        assert!(matches!(err, ScalingError::Ec2InstanceNotFound { .. }));
    }

    #[test]
    fn smallest_satisfying_type_is_preferred() {
        let catalog = vec![
            itype("m5.4xlarge", 16.0, 64 << 30),
            itype("m5.large", 2.0, 8 << 30),
            itype("m5.xlarge", 4.0, 16 << 30),
        ];
        let chosen = find_best_fitting(
            &catalog,
            &Resources::new(1.5, 6 << 30),
            closest_instance_policy,
        )
        .unwrap();
        assert_eq!(chosen.name, "m5.large");
    }

    #[test]
    fn ties_keep_catalog_order() {
        // identical shapes under different names: the earlier entry wins
        let catalog = vec![
            itype("first", 4.0, 8 << 30),
            itype("second", 4.0, 8 << 30),
        ];
        let chosen = find_best_fitting(
            &catalog,
            &Resources::new(2.0, 4 << 30),
            closest_instance_policy,
        )
        .unwrap();
        assert_eq!(chosen.name, "first");
    }

    #[test]
    fn too_small_on_one_axis_is_rejected() {
        // plenty of ram, not enough cpu
        assert_eq!(
            closest_instance_policy(&itype("a", 1.0, 64 << 30), &Resources::new(2.0, 1 << 30)),
            None
        );
        // plenty of cpu, not enough ram
        assert_eq!(
            closest_instance_policy(&itype("b", 16.0, 1 << 30), &Resources::new(2.0, 2 << 30)),
            None
        );
    }

    #[test]
    fn exact_fit_scores_zero() {
        let score =
            closest_instance_policy(&itype("a", 2.0, 4 << 30), &Resources::new(2.0, 4 << 30))
                .unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn generic_resources_do_not_affect_the_fit() {
        let catalog = vec![itype("t2.micro", 1.0, 1 << 30)];
        let need = Resources::new(1.0, 1 << 30).with_generic("dask-worker-thread", 1.0);
        assert!(find_best_fitting(&catalog, &need, closest_instance_policy).is_ok());
    }
}
