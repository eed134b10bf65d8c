//! Projection of operator-chosen processor/chip/thread index sets onto the
//! target tree.

use crate::devicetree::NodeId;
use crate::error::Error;
use crate::target::System;

pub const MAX_PROCESSORS: usize = 64;
pub const MAX_CHIPS: usize = 24;
pub const MAX_THREADS: usize = 8;

/// Three bounded index sets, applied top-down: a chip is only selected when
/// its processor is, a thread only when its chip is.
///
/// The state is an explicit value threaded through [SelectionState::apply];
/// applying is idempotent because the full boolean state of every target is
/// recomputed each time.
#[derive(Debug, Clone)]
pub struct SelectionState {
    processors: [bool; MAX_PROCESSORS],
    chips: [bool; MAX_CHIPS],
    threads: [bool; MAX_THREADS],
}

impl SelectionState {
    /// Build a selection from per-level index lists.
    ///
    /// `None` means the level was not given on the command line; with `all`
    /// set, such levels select every valid index (equivalent to a full
    /// contiguous range list), otherwise they select nothing.
    ///
    /// The selection hierarchy is validated here, before any target is
    /// mutated: chips or threads without processors, and threads without
    /// chips, are configuration errors.
    pub fn build(
        processors: Option<&[usize]>,
        chips: Option<&[usize]>,
        threads: Option<&[usize]>,
        all: bool,
    ) -> Result<SelectionState, Error> {
        let processors = level::<MAX_PROCESSORS>("processor", processors, all)?;
        let chips = level::<MAX_CHIPS>("chip", chips, all)?;
        let threads = level::<MAX_THREADS>("thread", threads, all)?;

        let any = |set: &[bool]| set.iter().any(|b| *b);
        if (any(&chips) || any(&threads)) && !any(&processors) {
            return Err(Error::Configuration(
                "No processor(s) selected. Use -p or -a to select processor(s)".into(),
            ));
        }
        if any(&threads) && !any(&chips) {
            return Err(Error::Configuration(
                "No chip(s) selected. Use -c or -a to select chip(s)".into(),
            ));
        }

        Ok(SelectionState {
            processors,
            chips,
            threads,
        })
    }

    /// Select every index at every level.
    pub fn all() -> SelectionState {
        // build() cannot fail with every level defaulted to all.
        Self::build(None, None, None, true).unwrap()
    }

    /// Recompute the `selected` bit of every target in the tree.
    ///
    /// Walks "pib" targets and their "core"/"chiplet" children and "thread"
    /// grandchildren; "fsi" targets mirror their processor's selection.
    /// Targets outside their chain's criteria are explicitly unselected.
    pub fn apply(&self, system: &mut System) {
        let pibs: Vec<NodeId> = system.by_class("pib").collect();
        for pib in pibs {
            let selected = self.index_in(&self.processors, system.target(pib).index());
            system.set_selected(pib, selected);

            for chip_class in ["core", "chiplet"] {
                for chip in system.children_of_class(pib, chip_class) {
                    let chip_selected =
                        selected && self.index_in(&self.chips, system.target(chip).index());
                    system.set_selected(chip, chip_selected);

                    for thread in system.children_of_class(chip, "thread") {
                        let thread_selected = chip_selected
                            && self.index_in(&self.threads, system.target(thread).index());
                        system.set_selected(thread, thread_selected);
                    }
                }
            }
        }

        let fsis: Vec<NodeId> = system.by_class("fsi").collect();
        for fsi in fsis {
            let selected = self.index_in(&self.processors, system.target(fsi).index());
            system.set_selected(fsi, selected);
        }
    }

    fn index_in(&self, set: &[bool], index: Option<u32>) -> bool {
        index
            .map(|i| set.get(i as usize).copied().unwrap_or(false))
            .unwrap_or(false)
    }
}

fn level<const N: usize>(
    name: &str,
    list: Option<&[usize]>,
    all: bool,
) -> Result<[bool; N], Error> {
    let mut set = [false; N];
    match list {
        Some(indices) => {
            for &i in indices {
                if i >= N {
                    return Err(Error::Configuration(format!(
                        "{name} index {i} larger than max {}",
                        N - 1
                    )));
                }
                set[i] = true;
            }
        }
        None if all => set = [true; N],
        None => {}
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::fake_system;

    fn selected_paths(system: &System) -> Vec<String> {
        system
            .tree()
            .iter()
            .filter(|id| system.target(*id).selected())
            .map(|id| system.path(id))
            .collect()
    }

    #[test]
    fn all_selects_the_entire_tree() {
        let (mut system, _) = fake_system();
        SelectionState::all().apply(&mut system);
        for class in ["pib", "core", "thread", "fsi"] {
            for id in system.by_class(class).collect::<Vec<_>>() {
                assert!(system.target(id).selected(), "{} unselected", system.path(id));
            }
        }
    }

    #[test]
    fn descendants_require_their_full_ancestor_chain() {
        let (mut system, _) = fake_system();
        let selection = SelectionState::build(Some(&[0]), Some(&[1]), Some(&[0]), false).unwrap();
        selection.apply(&mut system);

        assert_eq!(
            selected_paths(&system),
            ["/fsi0", "/pib0", "/pib0/core1", "/pib0/core1/thread0"]
        );
    }

    #[test]
    fn unselecting_an_ancestor_unselects_descendants_on_reapply() {
        let (mut system, _) = fake_system();
        SelectionState::all().apply(&mut system);

        // Drop processor 0; everything below it must go too, even though
        // its own chip/thread bits still match.
        let narrowed = SelectionState::build(Some(&[1]), None, None, true).unwrap();
        narrowed.apply(&mut system);

        for id in system.by_class("thread").collect::<Vec<_>>() {
            let under_pib1 = system.path(id).starts_with("/pib1");
            assert_eq!(system.target(id).selected(), under_pib1);
        }
        let pib0 = system.tree().find_by_path("/pib0").unwrap();
        assert!(!system.target(pib0).selected());
    }

    #[test]
    fn apply_is_idempotent() {
        let (mut system, _) = fake_system();
        let selection = SelectionState::build(Some(&[0]), Some(&[0]), None, false).unwrap();
        selection.apply(&mut system);
        let first = selected_paths(&system);
        selection.apply(&mut system);
        assert_eq!(selected_paths(&system), first);
    }

    #[test]
    fn processor_only_selection_with_all_takes_every_descendant() {
        let (mut system, _) = fake_system();
        // "-p 0 -a": explicit processor list, chips and threads implied.
        let selection = SelectionState::build(Some(&[0]), None, None, true).unwrap();
        selection.apply(&mut system);

        let pib0 = system.tree().find_by_path("/pib0").unwrap();
        for chip in system.children_of_class(pib0, "core") {
            assert!(system.target(chip).selected());
            for thread in system.children_of_class(chip, "thread") {
                assert!(system.target(thread).selected());
            }
        }
        let pib1 = system.tree().find_by_path("/pib1").unwrap();
        assert!(!system.target(pib1).selected());
    }

    #[test]
    fn hierarchy_violations_are_rejected_before_any_mutation() {
        let err = SelectionState::build(None, Some(&[0]), None, false).unwrap_err();
        assert!(err.to_string().contains("No processor(s) selected"));

        let err = SelectionState::build(Some(&[0]), None, Some(&[0]), false).unwrap_err();
        assert!(err.to_string().contains("No chip(s) selected"));
    }

    #[test]
    fn out_of_range_indices_are_configuration_errors() {
        assert!(SelectionState::build(Some(&[64]), None, None, false).is_err());
        assert!(SelectionState::build(Some(&[0]), Some(&[24]), None, false).is_err());
        assert!(SelectionState::build(Some(&[0]), Some(&[0]), Some(&[8]), false).is_err());
    }
}
