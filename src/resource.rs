use core::{fmt, str::FromStr};
use thiserror::Error;

/// Error produced when a resource specification or memory size is invalid.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ResourceError {
    /// A job asked for zero cores.
    #[error("invalid resource spec: cores must be at least 1")]
    ZeroCores,
    /// A job asked for zero bytes of memory.
    #[error("invalid resource spec: memory must be greater than zero")]
    ZeroMemory,
    /// A memory string could not be parsed.
    #[error("invalid memory size `{input}`: {reason}")]
    InvalidMemory {
        /// The rejected input.
        input: String,
        /// What was wrong with it.
        reason: &'static str,
    },
}

const KIB: u64 = 1 << 10;
const MIB: u64 = 1 << 20;
const GIB: u64 = 1 << 30;
const TIB: u64 = 1 << 40;

/// An amount of memory in bytes.
///
/// Parses the human notation pipeline definitions use (`"16G"`, `"512M"`,
/// `"2.5G"`, `"8GiB"`) and `"unlimited"`. Units are binary.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "String", into = "String")
)]
pub struct Memory(u64);

impl Memory {
    /// No limit; used for budgets that do not constrain memory.
    pub const UNLIMITED: Self = Self(u64::MAX);

    /// Memory of `bytes` bytes.
    #[must_use]
    pub const fn bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Memory of `n` KiB.
    #[must_use]
    pub const fn kib(n: u64) -> Self {
        Self(n.saturating_mul(KIB))
    }

    /// Memory of `n` MiB.
    #[must_use]
    pub const fn mib(n: u64) -> Self {
        Self(n.saturating_mul(MIB))
    }

    /// Memory of `n` GiB.
    #[must_use]
    pub const fn gib(n: u64) -> Self {
        Self(n.saturating_mul(GIB))
    }

    /// The size in bytes.
    #[must_use]
    pub const fn as_bytes(self) -> u64 {
        self.0
    }

    /// Whether this is [`Memory::UNLIMITED`].
    #[must_use]
    pub const fn is_unlimited(self) -> bool {
        self.0 == u64::MAX
    }
}

impl FromStr for Memory {
    type Err = ResourceError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ResourceError::InvalidMemory {
            input: input.to_owned(),
            reason,
        };
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case("unlimited") {
            return Ok(Self::UNLIMITED);
        }
        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);
        if number.is_empty() {
            return Err(invalid("missing number"));
        }
        let unit = unit.trim().to_ascii_uppercase();
        let unit = unit
            .strip_suffix("IB")
            .or_else(|| unit.strip_suffix('B'))
            .unwrap_or(&unit);
        let scale = match unit {
            "" => 1,
            "K" => KIB,
            "M" => MIB,
            "G" => GIB,
            "T" => TIB,
            _ => return Err(invalid("unknown unit, expected one of K, M, G, T")),
        };
        let bytes = if let Ok(whole) = number.parse::<u64>() {
            whole
                .checked_mul(scale)
                .ok_or_else(|| invalid("size overflows"))?
        } else {
            let fractional: f64 = number.parse().map_err(|_| invalid("malformed number"))?;
            let bytes = (fractional * scale as f64).round();
            if !bytes.is_finite() || bytes >= u64::MAX as f64 {
                return Err(invalid("size overflows"));
            }
            bytes as u64
        };
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Memory {
    type Error = ResourceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Memory> for String {
    fn from(value: Memory) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unlimited() {
            return f.write_str("unlimited");
        }
        let bytes = self.0;
        for (scale, suffix) in [(TIB, "T"), (GIB, "G"), (MIB, "M"), (KIB, "K")] {
            if bytes >= scale && bytes % scale == 0 {
                return write!(f, "{}{suffix}", bytes / scale);
            }
        }
        write!(f, "{bytes}")
    }
}

/// Unvalidated cores and memory, as read from configuration.
#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize)]
struct RawResources {
    cores: u32,
    memory: Memory,
}

/// CPU and memory a single job needs while it runs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "RawResources", into = "RawResources")
)]
pub struct ResourceSpec {
    cores: u32,
    memory: Memory,
}

impl ResourceSpec {
    /// What a job gets when it does not state its needs.
    pub const DEFAULT: Self = Self {
        cores: 1,
        memory: Memory::gib(2),
    };

    /// Nominal spec carried by barrier nodes. Barriers never consume budget.
    pub const BARRIER: Self = Self {
        cores: 1,
        memory: Memory::mib(1),
    };

    /// Validate and build a resource spec.
    ///
    /// # Errors
    /// If `cores` is zero or `memory` is zero bytes.
    pub fn new(cores: u32, memory: Memory) -> Result<Self, ResourceError> {
        if cores == 0 {
            return Err(ResourceError::ZeroCores);
        }
        if memory.as_bytes() == 0 {
            return Err(ResourceError::ZeroMemory);
        }
        Ok(Self { cores, memory })
    }

    /// Requested cores.
    #[must_use]
    pub fn cores(&self) -> u32 {
        self.cores
    }

    /// Requested memory.
    #[must_use]
    pub fn memory(&self) -> Memory {
        self.memory
    }
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for ResourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cores, {} memory", self.cores, self.memory)
    }
}

/// Total resources the scheduler may hand out at once.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "RawResources", into = "RawResources")
)]
pub struct ResourceBudget {
    cores: u32,
    memory: Memory,
}

impl ResourceBudget {
    /// Build a budget.
    ///
    /// # Errors
    /// If `cores` is zero or `memory` is zero bytes.
    pub fn new(cores: u32, memory: Memory) -> Result<Self, ResourceError> {
        let ResourceSpec { cores, memory } = ResourceSpec::new(cores, memory)?;
        Ok(Self { cores, memory })
    }

    /// All cores of the current machine and unlimited memory.
    #[must_use]
    pub fn detect() -> Self {
        let cores = std::thread::available_parallelism()
            .map_or(1, |n| u32::try_from(n.get()).unwrap_or(u32::MAX));
        Self {
            cores,
            memory: Memory::UNLIMITED,
        }
    }

    /// Total cores.
    #[must_use]
    pub fn cores(&self) -> u32 {
        self.cores
    }

    /// Total memory.
    #[must_use]
    pub fn memory(&self) -> Memory {
        self.memory
    }

    /// Whether a single job with `spec` could ever be admitted.
    #[must_use]
    pub fn admits(&self, spec: &ResourceSpec) -> bool {
        spec.cores <= self.cores && spec.memory <= self.memory
    }
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self::detect()
    }
}

impl fmt::Display for ResourceBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cores, {} memory", self.cores, self.memory)
    }
}

#[cfg(feature = "serde")]
impl TryFrom<RawResources> for ResourceSpec {
    type Error = ResourceError;

    fn try_from(RawResources { cores, memory }: RawResources) -> Result<Self, Self::Error> {
        Self::new(cores, memory)
    }
}

#[cfg(feature = "serde")]
impl From<ResourceSpec> for RawResources {
    fn from(ResourceSpec { cores, memory }: ResourceSpec) -> Self {
        Self { cores, memory }
    }
}

#[cfg(feature = "serde")]
impl TryFrom<RawResources> for ResourceBudget {
    type Error = ResourceError;

    fn try_from(RawResources { cores, memory }: RawResources) -> Result<Self, Self::Error> {
        Self::new(cores, memory)
    }
}

#[cfg(feature = "serde")]
impl From<ResourceBudget> for RawResources {
    fn from(ResourceBudget { cores, memory }: ResourceBudget) -> Self {
        Self { cores, memory }
    }
}

/// Resources currently held by running jobs.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub(crate) struct ResourceUsage {
    cores: u64,
    memory: u64,
}

impl ResourceUsage {
    pub(crate) fn fits(&self, spec: &ResourceSpec, budget: &ResourceBudget) -> bool {
        self.cores + u64::from(spec.cores) <= u64::from(budget.cores)
            && self
                .memory
                .checked_add(spec.memory.as_bytes())
                .is_some_and(|memory| memory <= budget.memory.as_bytes())
    }

    pub(crate) fn acquire(&mut self, spec: &ResourceSpec) {
        self.cores += u64::from(spec.cores);
        self.memory += spec.memory.as_bytes();
    }

    pub(crate) fn release(&mut self, spec: &ResourceSpec) {
        self.cores = self
            .cores
            .checked_sub(u64::from(spec.cores))
            .expect("ResourceUsage::release: [1]");
        self.memory = self
            .memory
            .checked_sub(spec.memory.as_bytes())
            .expect("ResourceUsage::release: [2]");
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.cores == 0 && self.memory == 0
    }
}
