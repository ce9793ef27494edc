use std::env;

use anyhow::{Result, anyhow, bail};
use nix::unistd::Pid;

use stele::{Inferior, maps};

const USAGE: &str = "usage: stele <pid> <addr> <length> <prot>";

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = parse_args()?;

    let mut inferior = Inferior::attach(args.pid)?;
    let returned = inferior.mprotect(args.addr, args.length, &args.prot)?;
    println!("mprotect returned {returned}");

    if returned == 0
        && let Some(region) = maps::region_covering(args.pid, args.addr, args.length)?
    {
        println!("{}", maps::describe(&region));
    }

    inferior.detach()?;
    Ok(())
}

struct Args {
    pid: Pid,
    addr: u64,
    length: u64,
    prot: String,
}

fn parse_args() -> Result<Args> {
    let mut args = env::args().skip(1);
    let (Some(pid), Some(addr), Some(length), Some(prot)) =
        (args.next(), args.next(), args.next(), args.next())
    else {
        bail!("expected four arguments ({USAGE})");
    };
    if args.next().is_some() {
        bail!("expected four arguments ({USAGE})");
    }

    let pid = parse_int(&pid)
        .and_then(|raw| i32::try_from(raw).ok())
        .map(Pid::from_raw)
        .ok_or_else(|| anyhow!("invalid pid '{pid}'"))?;
    let addr = parse_int(&addr).ok_or_else(|| anyhow!("invalid address '{addr}'"))?;
    let length = parse_int(&length).ok_or_else(|| anyhow!("invalid length '{length}'"))?;

    Ok(Args {
        pid,
        addr,
        length,
        prot,
    })
}

/// Accept decimal or 0x-prefixed hex, the way addresses usually arrive from
/// a debugger session.
fn parse_int(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}
