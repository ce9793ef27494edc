use anyhow::{Context, Result};
use nix::unistd::Pid;
use proc_maps::{MapRange, get_process_maps};

/// The mapping that fully contains `[addr, addr + len)`, if any.
pub fn region_covering(pid: Pid, addr: u64, len: u64) -> Result<Option<MapRange>> {
    let maps = get_process_maps(pid.as_raw())
        .with_context(|| format!("failed to read memory maps of pid {pid}"))?;
    let end = addr.saturating_add(len);
    Ok(maps.into_iter().find(|m| {
        let start = m.start() as u64;
        let stop = (m.start() + m.size()) as u64;
        addr >= start && end <= stop
    }))
}

/// One maps-style line: `start-end perms path`.
pub fn describe(region: &MapRange) -> String {
    let perms = format!(
        "{}{}{}",
        if region.is_read() { 'r' } else { '-' },
        if region.is_write() { 'w' } else { '-' },
        if region.is_exec() { 'x' } else { '-' },
    );
    let path = region
        .filename()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "[anon]".to_string());
    format!(
        "{:#x}-{:#x} {perms} {path}",
        region.start(),
        region.start() + region.size()
    )
}
