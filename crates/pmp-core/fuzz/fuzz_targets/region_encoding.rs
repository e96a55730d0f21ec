#![no_main]

use libfuzzer_sys::fuzz_target;
use pmp_core::pmp::{cfg_octet, decode_region, encode_na4, encode_napot, with_cfg_octet};
use pmp_core::{
    AccessKind, HarnessConfig, PrivilegeLevel, RegionConfig, RegionLock, RegionPermissions,
    SimHart,
};

const PERMISSIONS: [RegionPermissions; 7] = [
    RegionPermissions::None,
    RegionPermissions::ReadOnly,
    RegionPermissions::WriteOnly,
    RegionPermissions::ReadWrite,
    RegionPermissions::ExecuteOnly,
    RegionPermissions::SharedReadWrite,
    RegionPermissions::SharedExecuteOnly,
];

fuzz_target!(|data: &[u8]| {
    if data.len() < 10 {
        return;
    }

    let base = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let size = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let lock = if data[8] & 1 == 0 {
        RegionLock::Unlocked
    } else {
        RegionLock::Locked
    };
    let permissions = PERMISSIONS[usize::from(data[8] >> 1) % PERMISSIONS.len()];
    let config = RegionConfig::new(lock, permissions);
    let index = data[9] % 16;

    if let Ok(region) = encode_na4(config, base) {
        assert_eq!(decode_region(region.cfg, region.addr), Some(region.range));
    }
    if let Ok(region) = encode_napot(config, base, size) {
        assert_eq!(decode_region(region.cfg, region.addr), Some(region.range));
        assert!(region.range.contains(base));
    }

    let packed = with_cfg_octet(size, index % 4, data[8]);
    assert_eq!(cfg_octet(packed, index % 4), data[8]);

    let hart = SimHart::new(&HarnessConfig::default());
    let _ = hart.permits(base, AccessKind::Read, PrivilegeLevel::User);
});
