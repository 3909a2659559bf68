//! Parses the DfuSe interface string that describes a target's flash
//! layout and plans which pages/sectors an erase must cover for a given
//! write range.
//!
//! String form: `@Name /0xADDR/CC*SSKg,CC*SSKg,...` where each comma-
//! separated group is `<page count>*<page size><unit><memory type>`, unit
//! is `K`/`M`/`B` and memory type is a single letter (`a`=readable,
//! `b`=erasable, `c`=writable, `d`=readable+erasable, ... `g` is the usual
//! "readable, erasable, writable" combination STM32 internal flash reports).

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    /// Internal flash, RAM, OTP, etc. — parsed but not distinguished
    /// further; the flasher only needs page geometry, not the type letter.
    Generic,
}

/// One homogeneous run of equally-sized pages within a memory segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRun {
    pub start_address: u32,
    pub page_count: u32,
    pub page_size: u32,
    pub memory_type: MemoryType,
}

impl PageRun {
    pub fn end_address(&self) -> u64 {
        self.start_address as u64 + self.page_count as u64 * self.page_size as u64
    }

    /// Start addresses of every page in this run, in order.
    pub fn page_starts(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.page_count).map(move |i| self.start_address + i * self.page_size)
    }
}

/// A named memory region (usually "Internal Flash", sometimes "Option
/// Bytes" or "OTP Memory") as one contiguous address space made of
/// possibly differently-sized page runs.
#[derive(Debug, Clone)]
pub struct MemoryLayout {
    pub name: String,
    pub runs: Vec<PageRun>,
}

impl MemoryLayout {
    /// Parse a DFU interface string of the form
    /// `@Name /0xADDR/CC*SSKg,CC*SSKg,...`.
    pub fn parse(s: &str) -> CoreResult<Self> {
        let s = s.trim();
        let s = s.strip_prefix('@').ok_or_else(|| CoreError::ParseError {
            reason: "interface string missing '@' prefix".to_string(),
        })?;

        let mut parts = s.splitn(2, '/');
        let name = parts.next().unwrap_or("").trim().to_string();
        let rest = parts.next().ok_or_else(|| CoreError::ParseError {
            reason: "interface string missing address/layout section".to_string(),
        })?;

        let mut fields = rest.splitn(2, '/');
        let addr_str = fields.next().ok_or_else(|| CoreError::ParseError {
            reason: "interface string missing base address".to_string(),
        })?;
        let base_address = parse_hex_u32(addr_str)?;

        let layout_str = fields.next().unwrap_or("");
        let mut runs = Vec::new();
        let mut cursor = base_address;

        for group in layout_str.split(',') {
            let group = group.trim();
            if group.is_empty() {
                continue;
            }
            let run = parse_group(group, cursor)?;
            cursor = run.end_address() as u32;
            runs.push(run);
        }

        if runs.is_empty() {
            return Err(CoreError::ParseError {
                reason: "interface string declares no page groups".to_string(),
            });
        }

        Ok(Self { name, runs })
    }

    /// Compute the ordered, deduplicated list of page start addresses that
    /// must be erased to cover the write region `[start, start+len)`.
    pub fn erase_plan(&self, start: u32, len: u32) -> Vec<u32> {
        let end = start as u64 + len as u64;
        let mut plan = Vec::new();
        for run in &self.runs {
            for page_start in run.page_starts() {
                let page_end = page_start as u64 + run.page_size as u64;
                if page_end > start as u64 && (page_start as u64) < end {
                    plan.push(page_start);
                }
            }
        }
        plan
    }
}

fn parse_hex_u32(s: &str) -> CoreResult<u32> {
    let s = s.trim();
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u32::from_str_radix(s, 16).map_err(|_| CoreError::ParseError {
        reason: format!("invalid hex address '{s}'"),
    })
}

/// Parse one `CC*SSKg` group: page count, page size, unit multiplier, type letter.
fn parse_group(group: &str, start_address: u32) -> CoreResult<PageRun> {
    let star = group.find('*').ok_or_else(|| CoreError::ParseError {
        reason: format!("malformed page group '{group}': missing '*'"),
    })?;
    let page_count: u32 = group[..star].trim().parse().map_err(|_| CoreError::ParseError {
        reason: format!("malformed page count in '{group}'"),
    })?;

    let rest = &group[star + 1..];
    let unit_pos = rest
        .find(|c: char| c == 'K' || c == 'M' || c == 'B')
        .ok_or_else(|| CoreError::ParseError {
            reason: format!("malformed page group '{group}': missing size unit"),
        })?;
    let size_digits: u32 = rest[..unit_pos].trim().parse().map_err(|_| CoreError::ParseError {
        reason: format!("malformed page size in '{group}'"),
    })?;
    let unit = rest.as_bytes()[unit_pos] as char;
    let multiplier = match unit {
        'B' => 1,
        'K' => 1024,
        'M' => 1024 * 1024,
        _ => unreachable!("unit already constrained to K/M/B above"),
    };
    // The trailing memory-type letter(s) after the unit are ignored beyond
    // confirming at least one is present; only page geometry matters here,
    // not access-right bits.
    if rest.len() <= unit_pos + 1 {
        return Err(CoreError::ParseError {
            reason: format!("malformed page group '{group}': missing memory type letter"),
        });
    }

    Ok(PageRun {
        start_address,
        page_count,
        page_size: size_digits * multiplier,
        memory_type: MemoryType::Generic,
    })
}
