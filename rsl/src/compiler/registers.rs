//! Temporary allocation for intermediate expression results
use std::collections::BTreeSet;

/// Operand class, which selects the mnemonic suffix (`s` or `v`)
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Class {
    Scalar,
    Vector,
}

impl Class {
    pub fn suffix(&self) -> char {
        match self {
            Class::Scalar => 's',
            Class::Vector => 'v',
        }
    }
}

/// A synthetic temporary
///
/// Varying temporaries are named `$s<n>` or `$v<n>` and are created by the
/// assembler on first use, typed from the sigil after the `$`.  Uniform
/// temporaries (`$su<n>`, `$vu<n>`) must be declared in the `.data` section.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Temp {
    pub class: Class,
    pub varying: bool,
    pub index: usize,
}

impl Temp {
    pub fn name(&self) -> String {
        let u = if self.varying { "" } else { "u" };
        format!("${}{u}{}", self.class.suffix(), self.index)
    }
}

fn pool(class: Class, varying: bool) -> usize {
    (class as usize) * 2 + varying as usize
}

/// Single-pass temporary allocator
///
/// Released temporaries go back to a per-pool free set, and the lowest free
/// index is always handed out first, so short expressions keep reusing
/// `$s0` / `$v0`.
#[derive(Debug, Default)]
pub struct Registers {
    /// Released indexes, per (class, variability) pool
    spare: [BTreeSet<usize>; 4],
    /// Number of indexes ever handed out, per pool
    count: [usize; 4],
}

impl Registers {
    pub fn alloc(&mut self, class: Class, varying: bool) -> Temp {
        let p = pool(class, varying);
        let index = self.spare[p].pop_first().unwrap_or_else(|| {
            self.count[p] += 1;
            self.count[p] - 1
        });
        Temp {
            class,
            varying,
            index,
        }
    }

    pub fn release(&mut self, t: Temp) {
        self.spare[pool(t.class, t.varying)].insert(t.index);
    }

    /// Every uniform temporary that was ever allocated
    ///
    /// These need `.data` declarations in the assembly listing.
    pub fn uniform_temps(&self) -> impl Iterator<Item = Temp> + '_ {
        [Class::Scalar, Class::Vector].into_iter().flat_map(move |class| {
            (0..self.count[pool(class, false)]).map(move |index| Temp {
                class,
                varying: false,
                index,
            })
        })
    }
}
