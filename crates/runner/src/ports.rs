use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use std::ops::Range;

use crate::error::RunnerError;

/// Pick a port in `range` that no active process holds.
///
/// Candidates are tried in a shuffled order so a port released a moment ago is not
/// handed straight back out.
pub fn allocate<R: Rng + ?Sized>(
	in_use: &HashSet<u16>,
	range: Range<u16>,
	rng: &mut R,
) -> Result<u16, RunnerError> {
	let out_of_ports = RunnerError::OutOfPorts {
		min: range.start,
		max: range.end,
	};

	if in_use.len() >= range.len() {
		return Err(out_of_ports);
	}

	let mut candidates: Vec<u16> = range.collect();
	candidates.shuffle(rng);
	candidates
		.into_iter()
		.find(|port| !in_use.contains(port))
		.ok_or(out_of_ports)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::mock::StepRng;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	#[test]
	fn fails_fast_when_range_is_full() {
		let in_use: HashSet<u16> = [10, 11].into_iter().collect();
		let err = allocate(&in_use, 10..12, &mut StdRng::seed_from_u64(1)).unwrap_err();
		assert!(matches!(err, RunnerError::OutOfPorts { min: 10, max: 12 }));
	}

	#[test]
	fn empty_range_is_out_of_ports() {
		let err = allocate(&HashSet::new(), 10..10, &mut StdRng::seed_from_u64(1)).unwrap_err();
		assert!(matches!(err, RunnerError::OutOfPorts { .. }));
	}

	#[test]
	fn only_free_ports_are_returned() {
		let in_use: HashSet<u16> = [10, 11, 13].into_iter().collect();
		for seed in 0..20 {
			let port = allocate(&in_use, 10..15, &mut StdRng::seed_from_u64(seed)).unwrap();
			assert!(port == 12 || port == 14, "seed {seed} gave {port}");
		}
	}

	#[test]
	fn fills_the_whole_range_without_repeats() {
		let mut rng = StdRng::seed_from_u64(42);
		let mut in_use = HashSet::new();
		for _ in 0..16 {
			let port = allocate(&in_use, 40000..40016, &mut rng).unwrap();
			assert!((40000..40016).contains(&port));
			assert!(in_use.insert(port), "port {port} handed out twice");
		}
		assert!(allocate(&in_use, 40000..40016, &mut rng).is_err());
	}

	#[test]
	fn same_seed_same_port() {
		let a = allocate(&HashSet::new(), 40000..41000, &mut StdRng::seed_from_u64(7)).unwrap();
		let b = allocate(&HashSet::new(), 40000..41000, &mut StdRng::seed_from_u64(7)).unwrap();
		assert_eq!(a, b);
	}

	#[test]
	fn fixed_rng_gives_fixed_permutation() {
		let first = allocate(&HashSet::new(), 100..108, &mut StepRng::new(0, 0)).unwrap();
		let taken: HashSet<u16> = [first].into_iter().collect();
		let second = allocate(&taken, 100..108, &mut StepRng::new(0, 0)).unwrap();
		assert_ne!(first, second);
		assert_eq!(
			allocate(&taken, 100..108, &mut StepRng::new(0, 0)).unwrap(),
			second
		);
	}
}
