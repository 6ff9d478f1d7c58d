//! On-disk codec for the `plan` file. Layout: a 4-byte block count, then
//! for each [`PlanBlock`] a fixed header (`qkey`, `robot_oid`,
//! `delay_secs`, entry count) followed by its `PlanEntry` records.

use shepherd_core::plan::{Plan, PlanBlock, PlanEntry, PlanEntryFlags};
use shepherd_core::qkey::Qkey;
use shepherd_core::url_state::Oid;
use shepherd_core::{Error, Result};
use std::io::{Read, Write};

const ENTRY_SIZE: usize = 4 + 4 + 1 + 1 + 1 + 2 + 2;
const BLOCK_HEADER_SIZE: usize = 8 + 4 + 4 + 4;

fn encode_entry(e: &PlanEntry) -> [u8; ENTRY_SIZE] {
    let mut buf = [0u8; ENTRY_SIZE];
    buf[0..4].copy_from_slice(&e.oid.0.to_le_bytes());
    buf[4..8].copy_from_slice(&e.priority.to_le_bytes());
    buf[8] = e.retry_count;
    buf[9] = e.weight;
    buf[10] = e.flags.bits();
    buf[11..13].copy_from_slice(&e.section.to_le_bytes());
    buf[13..15].copy_from_slice(&e.area.to_le_bytes());
    buf
}

fn decode_entry(buf: &[u8]) -> Result<PlanEntry> {
    let flags = PlanEntryFlags::from_bits(buf[10])
        .ok_or_else(|| Error::Corruption("unknown plan entry flag bits".into()))?;
    Ok(PlanEntry {
        oid: Oid(u32::from_le_bytes(buf[0..4].try_into().unwrap())),
        priority: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        retry_count: buf[8],
        weight: buf[9],
        flags,
        section: u16::from_le_bytes(buf[11..13].try_into().unwrap()),
        area: u16::from_le_bytes(buf[13..15].try_into().unwrap()),
    })
}

/// Write a full plan to `w`.
pub fn write_plan<W: Write>(w: &mut W, plan: &Plan) -> Result<()> {
    w.write_all(&(plan.len() as u32).to_le_bytes())?;
    for block in plan {
        w.write_all(&block.qkey.0.to_le_bytes())?;
        w.write_all(&block.robot_oid.0.to_le_bytes())?;
        w.write_all(&block.delay_secs.to_le_bytes())?;
        w.write_all(&(block.entries.len() as u32).to_le_bytes())?;
        for entry in &block.entries {
            w.write_all(&encode_entry(entry))?;
        }
    }
    Ok(())
}

/// Read a full plan from `r`.
pub fn read_plan<R: Read>(r: &mut R) -> Result<Plan> {
    let mut u32buf = [0u8; 4];
    r.read_exact(&mut u32buf)?;
    let num_blocks = u32::from_le_bytes(u32buf);

    let mut plan = Vec::with_capacity(num_blocks as usize);
    for _ in 0..num_blocks {
        let mut header = [0u8; BLOCK_HEADER_SIZE];
        r.read_exact(&mut header)?;
        let qkey = Qkey(u64::from_le_bytes(header[0..8].try_into().unwrap()));
        let robot_oid = Oid(u32::from_le_bytes(header[8..12].try_into().unwrap()));
        let delay_secs = u32::from_le_bytes(header[12..16].try_into().unwrap());
        let num_entries = u32::from_le_bytes(header[16..20].try_into().unwrap());

        let mut entries = Vec::with_capacity(num_entries as usize);
        let mut ebuf = [0u8; ENTRY_SIZE];
        for _ in 0..num_entries {
            r.read_exact(&mut ebuf)?;
            entries.push(decode_entry(&ebuf)?);
        }
        plan.push(PlanBlock {
            qkey,
            robot_oid,
            delay_secs,
            entries,
        });
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shepherd_core::qkey::Skey;

    #[test]
    fn roundtrips_multi_block_plan() {
        let plan: Plan = vec![
            PlanBlock {
                qkey: Qkey::new(0, 80, Skey(1)),
                robot_oid: Oid::UNDEFINED,
                delay_secs: 5,
                entries: vec![PlanEntry {
                    oid: Oid(3),
                    priority: 42,
                    retry_count: 0,
                    weight: 100,
                    flags: PlanEntryFlags::REFRESH,
                    section: 1,
                    area: 2,
                }],
            },
            PlanBlock {
                qkey: Qkey::new(1, 443, Skey(2)),
                robot_oid: Oid(9),
                delay_secs: 1,
                entries: vec![],
            },
        ];
        let mut buf = Vec::new();
        write_plan(&mut buf, &plan).unwrap();
        let decoded = read_plan(&mut std::io::Cursor::new(buf)).unwrap();
        assert_eq!(decoded, plan);
    }

    #[test]
    fn empty_plan_roundtrips() {
        let plan: Plan = vec![];
        let mut buf = Vec::new();
        write_plan(&mut buf, &plan).unwrap();
        let decoded = read_plan(&mut std::io::Cursor::new(buf)).unwrap();
        assert!(decoded.is_empty());
    }
}
