use std::fmt::Display;

use nom::IResult;
use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case};
use nom::character::complete::space0;
use nom::combinator::{all_consuming, map};
use nom::number::complete::double;
use nom::sequence::{delimited, pair};
use tracing::debug;

use super::ConfigError;

const MEGABYTE: f64 = (1024 * 1024) as f64;
const GIGABYTE: f64 = (1024 * 1024 * 1024) as f64;

// Upper bounds for the store, whichever is smaller wins
pub const MAX_STORE_SIZE_BYTES: usize = 1024 * 1024 * 1024;
pub const MAX_STORE_PERCENT_OF_SYSTEM: usize = 25;

/// A memory size as written in the configuration, e.g. `64MB`, `1.5GB` or `5%`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MemorySize {
    Megabytes(f64),
    Gigabytes(f64),
    PercentOfSystem(f64)
}

#[derive(Clone, Copy)]
enum Unit {
    Megabytes,
    Gigabytes,
    Percent
}

fn unit(input: &str) -> IResult<&str, Unit> {
    alt((
        map(tag_no_case("MB"), |_| Unit::Megabytes),
        map(tag_no_case("GB"), |_| Unit::Gigabytes),
        map(tag("%"), |_| Unit::Percent)
    ))(input)
}

fn memory_size(input: &str) -> IResult<&str, (f64, Unit)> {
    delimited(space0, pair(double, delimited(space0, unit, space0)), space0)(input)
}

impl MemorySize {
    pub fn parse(input: &str) -> Result<MemorySize, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidMemorySize(format!("{:?}: {}", input, reason));
        let (_, (value, unit)) = all_consuming(memory_size)(input)
            .map_err(|_| invalid("expected a number followed by MB, GB or %"))?;
        if !value.is_finite() || value < 0.0 {
            return Err(invalid("size must be a non negative number"));
        }
        match unit {
            Unit::Megabytes => Ok(MemorySize::Megabytes(value)),
            Unit::Gigabytes => Ok(MemorySize::Gigabytes(value)),
            Unit::Percent if value > 100.0 => Err(invalid("percentage must not exceed 100")),
            Unit::Percent => Ok(MemorySize::PercentOfSystem(value))
        }
    }

    /// Converts to bytes. Percentages need the total system memory, `None` if it is unknown.
    pub fn to_bytes(&self, system_memory: Option<usize>) -> Option<usize> {
        match *self {
            MemorySize::Megabytes(mb) => Some((mb * MEGABYTE) as usize),
            MemorySize::Gigabytes(gb) => Some((gb * GIGABYTE) as usize),
            MemorySize::PercentOfSystem(percent) => system_memory.map(|total| (total as f64 * percent / 100.0) as usize)
        }
    }
}

impl Display for MemorySize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemorySize::Megabytes(mb) => write!(f, "{}MB", mb),
            MemorySize::Gigabytes(gb) => write!(f, "{}GB", gb),
            MemorySize::PercentOfSystem(percent) => write!(f, "{}%", percent)
        }
    }
}

#[cfg(unix)]
pub fn system_memory_bytes() -> Option<usize> {
    let (pages, page_size) = unsafe { (libc::sysconf(libc::_SC_PHYS_PAGES), libc::sysconf(libc::_SC_PAGESIZE)) };
    if pages <= 0 || page_size <= 0 {
        return None;
    }
    (pages as usize).checked_mul(page_size as usize)
}

#[cfg(not(unix))]
pub fn system_memory_bytes() -> Option<usize> {
    None
}

pub fn cap_store_size(requested: usize, system_memory: Option<usize>) -> usize {
    let limit = match system_memory {
        Some(total) => MAX_STORE_SIZE_BYTES.min(total / 100 * MAX_STORE_PERCENT_OF_SYSTEM),
        None => MAX_STORE_SIZE_BYTES
    };
    let capped = requested.min(limit);
    if capped < requested {
        debug!(requested, capped, "query stats store size has been capped");
    }
    capped
}

/// Parses a size string and caps it for use as the store budget.
pub fn resolve_store_size(input: &str) -> Result<usize, ConfigError> {
    let size = MemorySize::parse(input)?;
    let system_memory = system_memory_bytes();
    let requested = size.to_bytes(system_memory).ok_or_else(|| {
        ConfigError::InvalidMemorySize(format!("{}: total system memory is unknown", size))
    })?;
    Ok(cap_store_size(requested, system_memory))
}

#[cfg(test)]
mod tests {
    use super::{cap_store_size, MemorySize, MAX_STORE_SIZE_BYTES};

    #[test]
    fn parse_units() {
        assert_eq!(MemorySize::parse("64MB").unwrap(), MemorySize::Megabytes(64.0));
        assert_eq!(MemorySize::parse("1.5gb").unwrap(), MemorySize::Gigabytes(1.5));
        assert_eq!(MemorySize::parse(" 5 % ").unwrap(), MemorySize::PercentOfSystem(5.0));
        assert_eq!(MemorySize::parse("0MB").unwrap(), MemorySize::Megabytes(0.0));
    }

    #[test]
    fn parse_rejects_garbage() {
        for input in ["", "MB", "12", "12KB", "-1MB", "101%", "1MB extra", "inf%"] {
            assert!(MemorySize::parse(input).is_err(), "{} should not parse", input);
        }
    }

    #[test]
    fn to_bytes() {
        assert_eq!(MemorySize::Megabytes(2.0).to_bytes(None), Some(2 * 1024 * 1024));
        assert_eq!(MemorySize::Gigabytes(0.5).to_bytes(None), Some(512 * 1024 * 1024));
        assert_eq!(MemorySize::PercentOfSystem(10.0).to_bytes(Some(1000)), Some(100));
        assert_eq!(MemorySize::PercentOfSystem(10.0).to_bytes(None), None);
    }

    #[test]
    fn caps() {
        assert_eq!(cap_store_size(1024, Some(1 << 40)), 1024);
        assert_eq!(cap_store_size(usize::MAX, Some(1 << 40)), MAX_STORE_SIZE_BYTES);
        // A quarter of a small machine is below a gigabyte
        assert_eq!(cap_store_size(usize::MAX, Some(400 * 1024 * 1024)), 100 * 1024 * 1024);
        assert_eq!(cap_store_size(usize::MAX, None), MAX_STORE_SIZE_BYTES);
        assert_eq!(cap_store_size(0, Some(1 << 30)), 0);
    }
}
