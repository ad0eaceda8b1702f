//! The table of coherence scenarios
//!
//! Every scenario gives each role an ordered list of steps. Roles are the
//! process IDs 0, 1 and 2 plus "rest" for every ID from 3 up. Handles 2 and 3
//! are the barriers that order the roles within one repetition; the sequencer
//! brackets every repetition with handle 0 on its own.

use std::fmt;

use crate::config::Config;
use crate::ops::{Op, Target};

/// Barrier handles used inside a repetition
pub const PHASE_A: usize = 2;
pub const PHASE_B: usize = 3;

/// Number of distinct roles
pub const ROLES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteValue {
    Zero,
    Ones,
    /// Parity of the repetition index
    Parity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteWhen {
    Always,
    /// Only with `--success`
    SuccessSet,
    /// Only without `--success`
    SuccessUnset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Measured operation, recorded on `channel`
    Timed { op: Op, channel: usize },
    /// Same operation, untimed
    Helper(Op),
    /// Cross barrier `handle`
    Cross(usize),
    /// Plain store to word 0 of the base line, between full fences
    Write { value: WriteValue, when: WriteWhen },
}

const S: Target = Target::Strided;
const F: Target = Target::Fixed;
const B1: Step = Step::Cross(PHASE_A);
const B2: Step = Step::Cross(PHASE_B);

macro_rules! t {
    ($op:expr) => {
        Step::Timed { op: $op, channel: 0 }
    };
    ($op:expr, $channel:expr) => {
        Step::Timed {
            op: $op,
            channel: $channel,
        }
    };
}

macro_rules! h {
    ($op:expr) => {
        Step::Helper($op)
    };
}

macro_rules! w {
    ($value:ident, $when:ident) => {
        Step::Write {
            value: WriteValue::$value,
            when: WriteWhen::$when,
        }
    };
}

macro_rules! scenarios {
    ($($variant:ident = $name:literal,)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Scenario {
            $($variant,)*
        }

        impl Scenario {
            pub const ALL: &'static [Scenario] = &[$(Scenario::$variant,)*];

            pub fn name(&self) -> &'static str {
                match self {
                    $(Scenario::$variant => $name,)*
                }
            }
        }
    };
}

scenarios! {
    StoreOnModified = "STORE_ON_MODIFIED",
    StoreOnModifiedNoSync = "STORE_ON_MODIFIED_NO_SYNC",
    StoreOnExclusive = "STORE_ON_EXCLUSIVE",
    StoreOnShared = "STORE_ON_SHARED",
    StoreOnOwnedMine = "STORE_ON_OWNED_MINE",
    StoreOnOwned = "STORE_ON_OWNED",
    StoreOnInvalid = "STORE_ON_INVALID",
    LoadFromModified = "LOAD_FROM_MODIFIED",
    LoadFromExclusive = "LOAD_FROM_EXCLUSIVE",
    LoadFromShared = "LOAD_FROM_SHARED",
    LoadFromOwned = "LOAD_FROM_OWNED",
    LoadFromInvalid = "LOAD_FROM_INVALID",
    Cas = "CAS",
    Fai = "FAI",
    Tas = "TAS",
    Swap = "SWAP",
    CasOnModified = "CAS_ON_MODIFIED",
    FaiOnModified = "FAI_ON_MODIFIED",
    TasOnModified = "TAS_ON_MODIFIED",
    SwapOnModified = "SWAP_ON_MODIFIED",
    CasOnShared = "CAS_ON_SHARED",
    FaiOnShared = "FAI_ON_SHARED",
    TasOnShared = "TAS_ON_SHARED",
    SwapOnShared = "SWAP_ON_SHARED",
    CasConcurrent = "CAS_CONCURRENT",
    FaiOnInvalid = "FAI_ON_INVALID",
    LoadFromL1 = "LOAD_FROM_L1",
    LoadFromMemSize = "LOAD_FROM_MEM_SIZE",
    LFence = "LFENCE",
    SFence = "SFENCE",
    MFence = "MFENCE",
    Profiler = "PROFILER",
    Pause = "PAUSE",
    Nop = "NOP",
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Role of a process ID in every script
#[inline]
pub fn role_of(id: u32) -> usize {
    (id as usize).min(ROLES - 1)
}

impl Scenario {
    /// Event number as accepted by `--test`
    pub fn id(&self) -> u32 {
        *self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Whether the base line moves on by one stride after every repetition,
    /// so that each repetition starts from a line nobody has touched
    pub fn walks_buffer(&self) -> bool {
        matches!(
            self,
            Scenario::StoreOnExclusive
                | Scenario::StoreOnInvalid
                | Scenario::LoadFromExclusive
                | Scenario::LoadFromShared
                | Scenario::LoadFromInvalid
                | Scenario::FaiOnInvalid
        )
    }

    /// Processes needed to reach the coherence state under test
    pub fn min_cores(&self) -> u32 {
        match self {
            Scenario::StoreOnShared
            | Scenario::LoadFromShared
            | Scenario::LoadFromOwned
            | Scenario::CasOnShared
            | Scenario::FaiOnShared
            | Scenario::TasOnShared
            | Scenario::SwapOnShared => 3,
            _ => 2,
        }
    }

    /// Steps that the process with `id` runs in every repetition
    pub fn script(&self, id: u32) -> &'static [Step] {
        use Op::*;
        use Scenario as Sc;

        let role = role_of(id);
        match (self, role) {
            (Sc::StoreOnModified, 0) => &[t!(Store(S)), B1],
            (Sc::StoreOnModified, 1) => &[B1, t!(Store(S))],
            (Sc::StoreOnModified, _) => &[B1],

            (Sc::StoreOnModifiedNoSync, 0..=2) => &[t!(Store(F))],
            (Sc::StoreOnModifiedNoSync, _) => &[h!(Store(F))],

            (Sc::StoreOnExclusive, 0) => &[t!(Load(S)), B1],
            (Sc::StoreOnExclusive, 1) => &[B1, t!(Store(S))],
            (Sc::StoreOnExclusive, _) => &[B1],

            (Sc::StoreOnShared, 0) => &[t!(Load(S)), B1, B2],
            (Sc::StoreOnShared, 1) => &[B1, B2, t!(Store(S))],
            (Sc::StoreOnShared, 2) => &[B1, t!(Load(S)), B2],
            (Sc::StoreOnShared, _) => &[B1, h!(Load(S)), B2],

            (Sc::StoreOnOwnedMine, 0) => &[B1, t!(Load(S)), B2],
            (Sc::StoreOnOwnedMine, 1) => &[t!(Store(S)), B1, B2, t!(Store(S), 1)],
            (Sc::StoreOnOwnedMine, _) => &[B1, h!(Load(S)), B2],

            (Sc::StoreOnOwned, 0) => &[t!(Store(S)), B1, B2],
            (Sc::StoreOnOwned, 1) => &[B1, t!(Load(S)), B2, t!(Store(S), 1)],
            (Sc::StoreOnOwned, _) => &[B1, h!(Load(S)), B2],

            (Sc::StoreOnInvalid, 0) => &[B1, t!(Store(F))],
            (Sc::StoreOnInvalid, 1) => &[t!(Invalidate), B1],
            (Sc::StoreOnInvalid, _) => &[B1],

            (Sc::LoadFromModified, 0) => &[t!(Store(S)), B1],
            (Sc::LoadFromModified, 1) => &[B1, t!(Load(S))],
            (Sc::LoadFromModified, _) => &[B1],

            (Sc::LoadFromExclusive, 0) => &[t!(Load(S)), B1],
            (Sc::LoadFromExclusive, 1) => &[B1, t!(Load(S))],
            (Sc::LoadFromExclusive, _) => &[B1],

            (Sc::LoadFromShared, 0) => &[t!(Load(S)), B1, B2],
            (Sc::LoadFromShared, 1) => &[B1, t!(Load(S)), B2],
            (Sc::LoadFromShared, 2) => &[B1, B2, t!(Load(S))],
            (Sc::LoadFromShared, _) => &[B1, h!(Load(S)), B2],

            (Sc::LoadFromOwned, 0) => &[t!(Store(S)), B1, B2],
            (Sc::LoadFromOwned, 1) => &[B1, t!(Load(S)), B2],
            (Sc::LoadFromOwned, 2) => &[B1, B2, t!(Load(S))],
            (Sc::LoadFromOwned, _) => &[B1, B2],

            (Sc::LoadFromInvalid, 0) => &[B1, t!(Load(S))],
            (Sc::LoadFromInvalid, 1) => &[t!(Invalidate), B1],
            (Sc::LoadFromInvalid, _) => &[B1],

            (Sc::Cas, 0) => &[t!(Cas(S)), B1],
            (Sc::Cas, 1) => &[B1, t!(Cas(S))],
            (Sc::Cas, _) => &[B1],

            (Sc::Fai, 0) => &[t!(Fai(S)), B1],
            (Sc::Fai, 1) => &[B1, t!(Fai(S))],
            (Sc::Fai, _) => &[B1],

            (Sc::Tas, 0) => &[t!(Tas(S)), B1, B2],
            (Sc::Tas, 1) => &[B1, t!(Tas(S)), w!(Zero, Always), B2],
            (Sc::Tas, _) => &[B1, B2],

            (Sc::Swap, 0) => &[t!(Swap(S)), B1],
            (Sc::Swap, 1) => &[B1, t!(Swap(S))],
            (Sc::Swap, _) => &[B1],

            (Sc::CasOnModified, 0) => &[t!(Store(S)), w!(Parity, SuccessSet), B1],
            (Sc::CasOnModified, 1) => &[B1, t!(Cas(S))],
            (Sc::CasOnModified, _) => &[B1],

            (Sc::FaiOnModified, 0) => &[t!(Store(S)), B1],
            (Sc::FaiOnModified, 1) => &[B1, t!(Fai(S))],
            (Sc::FaiOnModified, _) => &[B1],

            (Sc::TasOnModified, 0) => &[t!(Store(S)), w!(Ones, SuccessUnset), B1],
            (Sc::TasOnModified, 1) => &[B1, t!(Tas(S))],
            (Sc::TasOnModified, _) => &[B1],

            (Sc::SwapOnModified, 0) => &[t!(Store(S)), B1],
            (Sc::SwapOnModified, 1) => &[B1, t!(Swap(S))],
            (Sc::SwapOnModified, _) => &[B1],

            (Sc::CasOnShared, 0) => &[t!(Load(S)), B1, B2],
            (Sc::CasOnShared, 1) => &[B1, B2, t!(Cas(S))],
            (Sc::CasOnShared, 2) => &[B1, t!(Load(S)), B2],
            (Sc::CasOnShared, _) => &[B1, h!(Load(S)), B2],

            (Sc::FaiOnShared, 0) => &[t!(Load(S)), B1, B2],
            (Sc::FaiOnShared, 1) => &[B1, B2, t!(Fai(S))],
            (Sc::FaiOnShared, 2) => &[B1, t!(Load(S)), B2],
            (Sc::FaiOnShared, _) => &[B1, h!(Load(S)), B2],

            (Sc::TasOnShared, 0) => &[
                w!(Zero, SuccessSet),
                w!(Ones, SuccessUnset),
                t!(Load(S)),
                B1,
                B2,
            ],
            (Sc::TasOnShared, 1) => &[B1, B2, t!(Tas(S))],
            (Sc::TasOnShared, 2) => &[B1, t!(Load(S)), B2],
            (Sc::TasOnShared, _) => &[B1, h!(Load(S)), B2],

            (Sc::SwapOnShared, 0) => &[t!(Load(S)), B1, B2],
            (Sc::SwapOnShared, 1) => &[B1, B2, t!(Swap(S))],
            (Sc::SwapOnShared, 2) => &[B1, t!(Load(S)), B2],
            (Sc::SwapOnShared, _) => &[B1, h!(Load(S)), B2],

            (Sc::CasConcurrent, 0 | 1) => &[t!(Cas(F))],
            (Sc::CasConcurrent, _) => &[h!(Cas(F))],

            (Sc::FaiOnInvalid, 0) => &[B1, t!(Fai(S))],
            (Sc::FaiOnInvalid, 1) => &[t!(Invalidate), B1],
            (Sc::FaiOnInvalid, _) => &[B1],

            (Sc::LoadFromL1, 0) => &[t!(Load(F)), t!(Load(F)), t!(Load(F))],
            (Sc::LoadFromL1, _) => &[],

            (Sc::LoadFromMemSize, 0..=2) => &[t!(ChaseList)],
            (Sc::LoadFromMemSize, _) => &[],

            (Sc::LFence, 0 | 1) => &[t!(LoadFence)],
            (Sc::SFence, 0 | 1) => &[t!(StoreFence)],
            (Sc::MFence, 0 | 1) => &[t!(FullFence)],
            (Sc::Pause, 0 | 1) => &[t!(Pause)],
            (Sc::Nop, 0 | 1) => &[t!(Nop)],
            (Sc::LFence | Sc::SFence | Sc::MFence | Sc::Pause | Sc::Nop, _) => &[],

            (Sc::Profiler, 0..=2) => &[t!(Empty)],
            (Sc::Profiler, _) => &[],
        }
    }

    /// Profiler channels that the process with `id` records into, ascending
    pub fn timed_channels(&self, id: u32) -> Vec<usize> {
        let mut channels: Vec<usize> = self
            .script(id)
            .iter()
            .filter_map(|step| match step {
                Step::Timed { channel, .. } => Some(*channel),
                _ => None,
            })
            .collect();
        channels.sort_unstable();
        channels.dedup();
        channels
    }

    /// The leader's explanation of what each reported core measured
    pub fn interpretation(&self, config: &Config) -> Vec<String> {
        use Scenario as Sc;

        let flush = config.flush;
        let short = config.cores < self.min_cores();
        let mut lines: Vec<String> = Vec::new();
        let mut say = |s: &str| lines.push(format!(" ** {}", s));

        match self {
            Sc::StoreOnModified => {
                if flush {
                    say("Results from Core 0 : store on invalid");
                    say("Results from Core 1 : store on modified");
                } else {
                    say("Results from Core 0 and 1 : store on modified");
                }
            }
            Sc::StoreOnModifiedNoSync => {
                if flush {
                    say("Results do not make sense");
                } else {
                    say("Results from Core 0 and 1 : store on modified while another core is also trying to do the same");
                }
            }
            Sc::StoreOnExclusive => {
                if flush {
                    say("Results from Core 0 : load from invalid");
                } else {
                    say("Results from Core 0 : load from invalid, BUT could have prefetching");
                }
                say("Results from Core 1 : store on exclusive");
            }
            Sc::StoreOnShared => {
                say("Results from Core 0 & 2: load from modified and exclusive or shared, respectively");
                say("Results from Core 1 : store on shared");
            }
            Sc::StoreOnOwnedMine => {
                say("Results from Core 0 : load from modified (makes it owned, if owned state is supported)");
                if flush {
                    say("Results 1 from Core 1 : store to invalid");
                } else {
                    say("Results 1 from Core 1 : store to modified mine");
                }
                say("Results 2 from Core 1 : store to owned mine (if owned is supported, else exclusive)");
            }
            Sc::StoreOnOwned => {
                if flush {
                    say("Results from Core 0 : store to invalid");
                } else {
                    say("Results from Core 0 : store to modified");
                }
                say("Results 1 from Core 1 : load from modified (makes it owned, if owned state is supported)");
                say("Results 2 from Core 1 : store to owned (if owned is supported, else exclusive mine)");
            }
            Sc::StoreOnInvalid => {
                say("Results from Core 0 : store on invalid");
                say("Results from Core 1 : cache line flush");
            }
            Sc::LoadFromModified => {
                if flush {
                    say("Results from Core 0 : store to invalid");
                } else {
                    say("Results from Core 0 : store to owned mine (if owned state supported, else exclusive)");
                }
                say("Results from Core 1 : load from modified (makes it owned, if owned state supported)");
            }
            Sc::LoadFromExclusive => {
                if flush {
                    say("Results from Core 0 : load from invalid");
                } else {
                    say("Results from Core 0 : load from invalid, BUT could have prefetching");
                }
                say("Results from Core 1 : load from exclusive");
            }
            Sc::LoadFromShared => {
                if flush {
                    say("Results from Core 0 : load from invalid");
                } else {
                    say("Results from Core 0 : load from invalid, BUT could have prefetching");
                }
                say("Results from Core 1 : load from exclusive");
                if !short {
                    say("Results from Core 2 : load from shared");
                }
            }
            Sc::LoadFromOwned => {
                if flush {
                    say("Results from Core 0 : store to invalid");
                } else {
                    say("Results from Core 0 : store to owned mine (if owned is supported, else shared)");
                }
                say("Results from Core 1 : load from modified");
                if !short {
                    say("Results from Core 2 : load from owned");
                }
            }
            Sc::LoadFromInvalid => {
                say("Results from Core 0 : load from invalid");
                say("Results from Core 1 : cache line flush");
            }
            Sc::Cas => {
                say("Results from Core 0 : CAS successfull");
                say("Results from Core 1 : CAS unsuccessfull");
            }
            Sc::Fai => say("Results from Cores 0 & 1: FAI"),
            Sc::Tas => {
                say("Results from Core 0 : TAS successfull");
                say("Results from Core 1 : TAS unsuccessfull");
            }
            Sc::Swap => say("Results from Cores 0 & 1: SWAP"),
            Sc::CasOnModified => {
                say("Results from Core 0 : store on modified");
                let succ = if config.success { 100 } else { 50 };
                say(&format!("Results from Core 1 : CAS on modified ({}% successfull)", succ));
            }
            Sc::FaiOnModified => {
                say("Results from Core 0 : store on modified");
                say("Results from Core 1 : FAI on modified");
            }
            Sc::TasOnModified => {
                say("Results from Core 0 : store on modified");
                let succ = if config.success { 100 } else { 0 };
                say(&format!("Results from Core 1 : TAS on modified ({}% successfull)", succ));
            }
            Sc::SwapOnModified => {
                say("Results from Core 0 : store on modified");
                say("Results from Core 1 : SWAP on modified");
            }
            Sc::CasOnShared => {
                say("Results from Core 0 : load from modified");
                say("Results from Core 1 : CAS on shared (100% successfull)");
                say("Results from Core 2 : load from exlusive or shared");
            }
            Sc::FaiOnShared => {
                say("Results from Core 0 : load from modified");
                say("Results from Core 1 : FAI on shared");
                say("Results from Core 2 : load from exlusive or shared");
            }
            Sc::TasOnShared => {
                say("Results from Core 0 : load from L1");
                let succ = if config.success { 100 } else { 0 };
                say(&format!("Results from Core 1 : TAS on shared ({}% successfull)", succ));
                say("Results from Core 2 : load from exlusive or shared");
            }
            Sc::SwapOnShared => {
                say("Results from Core 0 : load from modified");
                say("Results from Core 1 : SWAP on shared");
                say("Results from Core 2 : load from exlusive or shared");
            }
            Sc::CasConcurrent => say("Results from Cores 0 & 1: CAS concurrent"),
            Sc::FaiOnInvalid => {
                say("Results from Core 0 : FAI on invalid");
                say("Results from Core 1 : cache line flush");
            }
            Sc::LoadFromL1 => say("Results from Core 0: load from L1"),
            Sc::LoadFromMemSize => say(&format!(
                "Results from Cores 0 & 1 & 2: load from random {} KiB",
                config.mem_size / 1024
            )),
            Sc::LFence => say("Results from Cores 0 & 1: load fence"),
            Sc::SFence => say("Results from Cores 0 & 1: store fence"),
            Sc::MFence => say("Results from Cores 0 & 1: full fence"),
            Sc::Profiler => {
                say("Results from Cores 0 & 1: empty profiler region (start_prof - empty - stop_prof)")
            }
            Sc::Pause => say("Results from Cores 0 & 1: pause"),
            Sc::Nop => say("Results from Cores 0 & 1: nop"),
        }

        if short {
            if *self == Sc::LoadFromOwned {
                say("Need 3 processes to achieve LOAD_FROM_OWNED");
            } else {
                say(&format!("Need >=3 processes to achieve {}", self.name()));
            }
        }

        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_declaration_order() {
        assert_eq!(Scenario::ALL.len(), 34);
        assert_eq!(Scenario::from_id(12), Some(Scenario::Cas));
        assert_eq!(Scenario::from_id(31), Some(Scenario::Profiler));
        assert_eq!(Scenario::from_id(33), Some(Scenario::Nop));
        assert_eq!(Scenario::from_id(34), None);
        for (i, s) in Scenario::ALL.iter().enumerate() {
            assert_eq!(s.id() as usize, i);
        }
    }

    #[test]
    fn roles_agree_on_phase_barriers() {
        // Every role of a scenario has to cross each phase barrier equally often,
        // otherwise the participants of that barrier would never all arrive
        for scenario in Scenario::ALL {
            let crossings = |id: u32, handle: usize| {
                scenario
                    .script(id)
                    .iter()
                    .filter(|s| **s == Step::Cross(handle))
                    .count()
            };
            for handle in [PHASE_A, PHASE_B] {
                let expected = crossings(0, handle);
                for id in 1..5 {
                    assert_eq!(crossings(id, handle), expected, "{} role {}", scenario, id);
                }
            }
        }
    }

    #[test]
    fn owned_scenarios_use_second_channel() {
        assert_eq!(Scenario::StoreOnOwned.timed_channels(1), vec![0, 1]);
        assert_eq!(Scenario::StoreOnOwned.timed_channels(0), vec![0]);
        assert!(Scenario::StoreOnOwned.timed_channels(2).is_empty());
        assert!(Scenario::Cas.timed_channels(7).is_empty());
    }

    #[test]
    fn short_runs_are_flagged() {
        let config = Config {
            cores: 2,
            ..Config::default()
        };
        let lines = Scenario::StoreOnShared.interpretation(&config);
        assert!(lines.last().unwrap().contains("Need >=3 processes to achieve STORE_ON_SHARED"));

        let config = Config { cores: 3, ..config };
        let lines = Scenario::StoreOnShared.interpretation(&config);
        assert!(lines.iter().all(|l| !l.contains("Need")));
    }
}
