use std::cell::Cell;

use guestmem_core::{AccessKind, Ea, FlatMemory, GuestMemory, Protection, Ra};
use proptest::prelude::*;

use crate::{
    ConcurrencyModel, Fault, FaultCause, FaultKind, Hypervisor, Lpcr, Msr, PageTableEntry,
    PartitionTableEntry, Ptcr, RadixError, RadixRoot, RadixTranslator, RcTracking, Registers,
    TranslatorConfig,
    testing::{CountingMemory, RWX_LEAF, RacingMemory, TreeBuilder},
    walk_tree,
};

const MEMORY_SIZE: usize = 0x100_0000;
const BITS: u64 = 52;

/// Partition table, 4 KiB.
const PTCR_BASE: u64 = 0x1_0000;

/// Host allocations start here.
const HOST_TABLES: u64 = 0x10_0000;

/// Guest real address `g` is backed by host memory at `g + GUEST_OFFSET`.
const GUEST_OFFSET: u64 = 0x80_0000;

/// Guest allocations start here, in guest real addresses.
const GUEST_TABLES: u64 = 0x1_0000;

const PAGE_4K: &[u64] = &[9, 9, 9];
const PAGE_2M: &[u64] = &[9, 9];
const PAGE_1G: &[u64] = &[9];

fn leaf_at(memory: &FlatMemory, address: Ra) -> PageTableEntry {
    PageTableEntry(memory.read_u64(address).unwrap())
}

fn expect_fault(result: Result<crate::Translation, RadixError>) -> Fault {
    match result {
        Err(RadixError::Fault(fault)) => fault,
        other => panic!("expected a fault, got {other:?}"),
    }
}

/// A hypervisor translating its own process-scoped addresses (partition 0,
/// MSR[HV] set). Process tables are host real addresses.
struct Host {
    memory: FlatMemory,
    registers: Registers,
    root: RadixRoot,
    next: Cell<u64>,
}

impl Host {
    fn new() -> Self {
        let memory = FlatMemory::new(MEMORY_SIZE);
        let mut tree = TreeBuilder::new(&memory, HOST_TABLES);

        let partition_root = tree.root(13, BITS);
        let process_table = tree.alloc(0x1000);
        let root = tree.root(13, BITS);

        tree.write(
            Ra(PTCR_BASE),
            PartitionTableEntry::HR | partition_root.to_doubleword(),
        );
        tree.write(Ra(PTCR_BASE + 8), process_table.0);
        tree.write(process_table + 16, root.to_doubleword());

        let next = tree.next();

        Self {
            memory,
            registers: Registers {
                msr: Msr(Msr::HV | Msr::IR | Msr::DR),
                lpidr: 0,
                pidr: 1,
                lpcr: Lpcr(Lpcr::UPRT),
                ptcr: Ptcr(PTCR_BASE),
                ..Default::default()
            },
            root,
            next: Cell::new(next),
        }
    }

    fn map(&self, ea: u64, levels: &[u64], ra: u64, leaf: u64) -> Ra {
        let mut tree = TreeBuilder::new(&self.memory, self.next.get());
        let entry = tree.map(self.root, ea, levels, ra, leaf);
        self.next.set(tree.next());
        entry
    }

    fn translator(&self) -> RadixTranslator<&FlatMemory> {
        RadixTranslator::new(&self.memory, Hypervisor::Native)
    }
}

/// A guest in partition 1 whose process tables live in guest real memory.
///
/// Guest real addresses `0..2M` (the guest tables) and `2M..4M` are mapped
/// by the partition-scoped tree with 2 MiB pages.
struct Guest {
    memory: FlatMemory,
    registers: Registers,
    partition_root: RadixRoot,
    process_root: RadixRoot,
    process_table: Ra,
    table_leaf: Ra,
    host_next: Cell<u64>,
    guest_next: Cell<u64>,
}

impl Guest {
    fn new() -> Self {
        let memory = FlatMemory::new(MEMORY_SIZE);

        let mut host = TreeBuilder::new(&memory, HOST_TABLES);
        let partition_root = host.root(13, BITS);
        let table_leaf = host.map(partition_root, 0, PAGE_2M, GUEST_OFFSET, RWX_LEAF);
        host.map(
            partition_root,
            0x20_0000,
            PAGE_2M,
            GUEST_OFFSET + 0x20_0000,
            RWX_LEAF,
        );

        let mut guest = TreeBuilder::with_offset(&memory, GUEST_TABLES, GUEST_OFFSET);
        let process_table = guest.alloc(0x1000);
        let process_root = guest.root(13, BITS);
        guest.write(process_table + 16, process_root.to_doubleword());

        host.write(
            Ra(PTCR_BASE + 16),
            PartitionTableEntry::HR | partition_root.to_doubleword(),
        );
        host.write(Ra(PTCR_BASE + 24), process_table.0);

        let host_next = host.next();
        let guest_next = guest.next();

        Self {
            memory,
            registers: Registers {
                msr: Msr(Msr::IR | Msr::DR),
                lpidr: 1,
                pidr: 1,
                lpcr: Lpcr(Lpcr::UPRT),
                ptcr: Ptcr(PTCR_BASE),
                ..Default::default()
            },
            partition_root,
            process_root,
            process_table,
            table_leaf,
            host_next: Cell::new(host_next),
            guest_next: Cell::new(guest_next),
        }
    }

    /// Maps guest real address `guest_ra` to host real address `ra`.
    fn map_partition(&self, guest_ra: u64, levels: &[u64], ra: u64, leaf: u64) -> Ra {
        let mut tree = TreeBuilder::new(&self.memory, self.host_next.get());
        let entry = tree.map(self.partition_root, guest_ra, levels, ra, leaf);
        self.host_next.set(tree.next());
        entry
    }

    /// Maps `ea` to guest real address `guest_ra`. Returns the host real
    /// address of the leaf.
    fn map_process(&self, ea: u64, levels: &[u64], guest_ra: u64, leaf: u64) -> Ra {
        let mut tree =
            TreeBuilder::with_offset(&self.memory, self.guest_next.get(), GUEST_OFFSET);
        let entry = tree.map(self.process_root, ea, levels, guest_ra, leaf);
        self.guest_next.set(tree.next());
        entry + GUEST_OFFSET
    }

    fn translator(&self) -> RadixTranslator<&FlatMemory> {
        RadixTranslator::new(&self.memory, Hypervisor::Native)
    }
}

#[test]
fn hypervisor_process_scoped() {
    let host = Host::new();
    host.map(0x0000_1234_5000, PAGE_4K, 0x9000, RWX_LEAF);

    let translation = host
        .translator()
        .translate(&host.registers, Ea(0x0000_1234_5abc), AccessKind::Read)
        .unwrap();

    assert_eq!(translation.ra(), Ra(0x9abc));
    assert_eq!(translation.page_size(), 12);
    assert_eq!(translation.protection(), Protection::RWX);
}

#[test]
fn hypervisor_large_page() {
    let host = Host::new();
    host.map(0x4000_0000, PAGE_1G, 0x4000_0000, RWX_LEAF);

    let translation = host
        .translator()
        .translate(&host.registers, Ea(0x4123_4567), AccessKind::Execute)
        .unwrap();

    assert_eq!(translation.ra(), Ra(0x4123_4567));
    assert_eq!(translation.page_size(), 30);
    assert_eq!(translation.page_bytes(), 1 << 30);
}

#[test]
fn empty_process_table_entry_is_badconfig() {
    let host = Host::new();

    // Quadrant 3 in hypervisor state selects pid 0, which has no tree.
    let fault = expect_fault(host.translator().translate(
        &host.registers,
        Ea(0xc000_0000_0000_1000),
        AccessKind::Read,
    ));

    assert_eq!(fault.kind, FaultKind::DataStorage);
    assert_eq!(fault.cause, Some(FaultCause::BadConfig));
    assert_eq!(fault.cause_bits(), Fault::DSISR_R_BADCONFIG);
}

#[test]
fn hypervisor_real_mode_is_identity() {
    let host = Host::new();
    let registers = Registers {
        msr: Msr(Msr::HV),
        ..host.registers
    };

    let translation = host
        .translator()
        .translate(&registers, Ea(0xf000_0000_dead_beef), AccessKind::Write)
        .unwrap();

    assert_eq!(translation.ra(), Ra(0xdead_beef));
    assert_eq!(translation.protection(), Protection::RWX);
    assert_eq!(translation.page_size(), 12);

    // Instruction relocation only affects fetches.
    let registers = Registers {
        msr: Msr(Msr::HV | Msr::IR),
        ..host.registers
    };
    let translation = host
        .translator()
        .translate(&registers, Ea(0x5000), AccessKind::Read)
        .unwrap();
    assert_eq!(translation.ra(), Ra(0x5000));
}

#[test]
fn virtual_hypervisor() {
    let memory = FlatMemory::new(MEMORY_SIZE);
    let mut tree = TreeBuilder::new(&memory, HOST_TABLES);

    let process_table = tree.alloc(0x1000);
    let root = tree.root(13, BITS);
    tree.write(process_table + 16, root.to_doubleword());
    tree.map(root, 0x7000, PAGE_4K, 0x3_0000, RWX_LEAF);

    // The partition-scoped root is never used for partition 0.
    let pate = PartitionTableEntry::new(PartitionTableEntry::HR | 13, process_table.0);
    let translator = RadixTranslator::new(&memory, Hypervisor::Virtual(pate));

    let registers = Registers {
        msr: Msr(Msr::IR | Msr::DR),
        lpidr: 0,
        pidr: 1,
        lpcr: Lpcr(Lpcr::UPRT),
        ..Default::default()
    };

    let translation = translator
        .translate(&registers, Ea(0x7010), AccessKind::Read)
        .unwrap();
    assert_eq!(translation.ra(), Ra(0x3_0010));

    // Real mode of partition 0.
    let registers = Registers {
        msr: Msr(0),
        ..registers
    };
    let translation = translator
        .translate(&registers, Ea(0x1000_0000_0000_7010), AccessKind::Read)
        .unwrap();
    assert_eq!(translation.ra(), Ra(0x7010));
}

#[test]
fn nested_translation() {
    let guest = Guest::new();
    guest.map_process(0x1000_0000, PAGE_4K, 0x30_0000, RWX_LEAF);

    let translation = guest
        .translator()
        .translate(&guest.registers, Ea(0x1000_0123), AccessKind::Read)
        .unwrap();

    assert_eq!(translation.ra(), Ra(GUEST_OFFSET + 0x30_0123));
    assert_eq!(translation.page_size(), 12);
    assert_eq!(translation.protection(), Protection::RWX);
}

#[test]
fn nested_page_size_is_minimum() {
    let guest = Guest::new();

    // A 1 GiB process-scoped page backed by 2 MiB partition-scoped pages.
    guest.map_process(0x4000_0000, PAGE_1G, 0, RWX_LEAF);

    let translation = guest
        .translator()
        .translate(&guest.registers, Ea(0x4021_0000), AccessKind::Read)
        .unwrap();

    assert_eq!(translation.ra(), Ra(GUEST_OFFSET + 0x21_0000));
    assert_eq!(translation.page_size(), 21);
}

#[test]
fn partition_scoped_only_without_relocation() {
    let guest = Guest::new();
    let registers = Registers {
        msr: Msr(0),
        ..guest.registers
    };

    let translation = guest
        .translator()
        .translate(&registers, Ea(0xc000_0000_0020_0123), AccessKind::Write)
        .unwrap();

    assert_eq!(translation.ra(), Ra(GUEST_OFFSET + 0x20_0123));
    assert_eq!(translation.page_size(), 21);
}

#[test]
fn nested_data_fault_goes_to_hypervisor() {
    let guest = Guest::new();
    guest.map_process(0x2000_0000, PAGE_4K, 0x60_0000, RWX_LEAF);

    let fault = expect_fault(guest.translator().translate(
        &guest.registers,
        Ea(0x2000_0008),
        AccessKind::Write,
    ));

    assert_eq!(fault.kind, FaultKind::HostDataStorage);
    assert_eq!(fault.ea, Ea(0x2000_0008));
    assert_eq!(fault.guest_ra, Some(Ra(0x60_0008)));
    assert!(!fault.table_walk);
    assert_eq!(
        fault.cause_bits(),
        Fault::DSISR_NOPTE | Fault::DSISR_ISSTORE
    );

    let fault = expect_fault(guest.translator().translate(
        &guest.registers,
        Ea(0x2000_0008),
        AccessKind::Execute,
    ));
    assert_eq!(fault.kind, FaultKind::HostInstructionStorage);
}

#[test]
fn nested_table_fault_is_marked() {
    let guest = Guest::new();
    guest.map_process(0x1000_0000, PAGE_4K, 0x30_0000, RWX_LEAF);

    // Remove the partition-scoped mapping of the guest tables.
    guest.memory.write_u64(guest.table_leaf, 0).unwrap();

    let fault = expect_fault(guest.translator().translate(
        &guest.registers,
        Ea(0x1000_0000),
        AccessKind::Write,
    ));

    // Table entries are fetched with reads.
    assert_eq!(fault.kind, FaultKind::HostDataStorage);
    assert_eq!(fault.access, AccessKind::Read);
    assert_eq!(fault.guest_ra, Some(guest.process_table + 16));
    assert!(fault.table_walk);
    assert_eq!(
        fault.cause_bits(),
        Fault::DSISR_NOPTE | Fault::DSISR_PRTABLE_FAULT
    );
}

#[test]
fn guest_process_fault() {
    let guest = Guest::new();

    let fault = expect_fault(guest.translator().translate(
        &guest.registers,
        Ea(0x1000_0000),
        AccessKind::Read,
    ));

    assert_eq!(fault.kind, FaultKind::DataStorage);
    assert_eq!(fault.cause, Some(FaultCause::NoPte));
    assert_eq!(fault.guest_ra, None);
    assert_eq!(fault.cause_bits(), Fault::DSISR_NOPTE);
}

#[test]
fn guest_rc_update_reaches_host_memory() {
    let guest = Guest::new();
    let leaf = guest.map_process(0x1000_0000, PAGE_4K, 0x30_0000, PageTableEntry::EAA_RW);

    guest
        .translator()
        .translate(&guest.registers, Ea(0x1000_0000), AccessKind::Write)
        .unwrap();

    let pte = leaf_at(&guest.memory, leaf);
    assert!(pte.reference());
    assert!(pte.change());
}

#[test]
fn illegal_quadrant_is_segment_fault() {
    let guest = Guest::new();
    let translator = guest.translator();

    let fault = expect_fault(translator.translate(
        &guest.registers,
        Ea(0x4000_0000_0000_0000),
        AccessKind::Read,
    ));
    assert_eq!(fault.kind, FaultKind::DataSegment);
    assert_eq!(fault.cause, None);
    assert_eq!(fault.cause_bits(), 0);

    let fault = expect_fault(translator.translate(
        &guest.registers,
        Ea(0x8000_0000_0000_0000),
        AccessKind::Execute,
    ));
    assert_eq!(fault.kind, FaultKind::InstructionSegment);
}

#[test]
fn partition_table_checks() {
    let guest = Guest::new();
    let translator = guest.translator();

    let translate = |registers: &Registers| {
        expect_fault(translator.translate(registers, Ea(0x1000_0000), AccessKind::Read))
    };

    // Empty entry: no host radix flag.
    let registers = Registers {
        lpidr: 7,
        ..guest.registers
    };
    assert_eq!(translate(&registers).cause, Some(FaultCause::BadConfig));

    // Beyond the end of the 4 KiB table.
    let registers = Registers {
        lpidr: 256,
        ..guest.registers
    };
    let fault = translate(&registers);
    assert_eq!(fault.kind, FaultKind::DataStorage);
    assert_eq!(fault.cause, Some(FaultCause::NoPte));

    // Partition 0 outside hypervisor state.
    guest
        .memory
        .write_u64(Ra(PTCR_BASE), PartitionTableEntry::HR | guest.partition_root.to_doubleword())
        .unwrap();
    let registers = Registers {
        lpidr: 0,
        ..guest.registers
    };
    assert_eq!(translate(&registers).cause, Some(FaultCause::BadConfig));

    // Root directory too small.
    let dw0 = PartitionTableEntry::HR
        | RadixRoot {
            size: 4,
            ..guest.partition_root
        }
        .to_doubleword();
    guest.memory.write_u64(Ra(PTCR_BASE + 16), dw0).unwrap();
    assert_eq!(translate(&guest.registers).cause, Some(FaultCause::BadConfig));
}

#[test]
fn pid_beyond_process_table() {
    let guest = Guest::new();
    let registers = Registers {
        pidr: 256,
        ..guest.registers
    };

    let fault = expect_fault(guest.translator().translate(
        &registers,
        Ea(0x1000_0000),
        AccessKind::Read,
    ));
    assert_eq!(fault.kind, FaultKind::DataStorage);
    assert_eq!(fault.cause, Some(FaultCause::NoPte));
}

#[test]
fn protection_faults() {
    let host = Host::new();
    let translator = host.translator();

    host.map(0x1000, PAGE_4K, 0x1000, PageTableEntry::EAA_R | PageTableEntry::R | PageTableEntry::C);
    let fault = expect_fault(translator.translate(&host.registers, Ea(0x1000), AccessKind::Write));
    assert_eq!(fault.kind, FaultKind::DataStorage);
    assert_eq!(fault.cause, Some(FaultCause::Protection));
    assert_eq!(
        fault.cause_bits(),
        Fault::DSISR_PROTFAULT | Fault::DSISR_ISSTORE
    );

    // Non-idempotent I/O is never fetched from.
    host.map(0x2000, PAGE_4K, 0x2000, RWX_LEAF | 0x20);
    let fault = expect_fault(translator.translate(&host.registers, Ea(0x2000), AccessKind::Execute));
    assert_eq!(fault.kind, FaultKind::InstructionStorage);
    assert_eq!(fault.cause, Some(FaultCause::Guarded));
    assert_eq!(fault.cause_bits(), Fault::SRR1_NOEXEC_GUARD);

    // Privileged page accessed in problem state.
    host.map(0x3000, PAGE_4K, 0x3000, RWX_LEAF | PageTableEntry::EAA_PRIV);
    let registers = Registers {
        msr: Msr(host.registers.msr.0 | Msr::PR),
        ..host.registers
    };
    let fault = expect_fault(translator.translate(&registers, Ea(0x3000), AccessKind::Read));
    assert_eq!(fault.cause, Some(FaultCause::Protection));

    // Authority mask denies writes.
    host.map(0x4000, PAGE_4K, 0x4000, RWX_LEAF);
    let registers = Registers {
        amr: 0b10 << 62,
        ..host.registers
    };
    let fault = expect_fault(translator.translate(&registers, Ea(0x4000), AccessKind::Write));
    assert_eq!(fault.cause, Some(FaultCause::Protection));
    let translation = translator
        .translate(&registers, Ea(0x4000), AccessKind::Read)
        .unwrap();
    assert_eq!(translation.protection(), Protection::RX);
}

#[test]
fn hardware_rc_updates() {
    for concurrency in [ConcurrencyModel::SingleWriter, ConcurrencyModel::MultiWriter] {
        let host = Host::new();
        let leaf = host.map(0x1000, PAGE_4K, 0x8000, PageTableEntry::EAA_RW);

        let translator = RadixTranslator::with_config(
            &host.memory,
            Hypervisor::Native,
            TranslatorConfig {
                concurrency,
                ..Default::default()
            },
        );

        // Without the change bit the page is read only.
        let translation = translator
            .translate(&host.registers, Ea(0x1000), AccessKind::Read)
            .unwrap();
        assert_eq!(translation.protection(), Protection::R);
        let pte = leaf_at(&host.memory, leaf);
        assert!(pte.reference());
        assert!(!pte.change());

        let translation = translator
            .translate(&host.registers, Ea(0x1000), AccessKind::Write)
            .unwrap();
        assert_eq!(translation.protection(), Protection::RW);
        assert!(leaf_at(&host.memory, leaf).change());
    }
}

#[test]
fn marked_leaf_is_not_written() {
    let host = Host::new();
    host.map(0x1000, PAGE_4K, 0x8000, RWX_LEAF);

    let memory = CountingMemory::new(&host.memory);
    let translator = RadixTranslator::new(&memory, Hypervisor::Native);

    translator
        .translate(&host.registers, Ea(0x1000), AccessKind::Write)
        .unwrap();
    translator
        .translate(&host.registers, Ea(0x1000), AccessKind::Read)
        .unwrap();

    assert_eq!(memory.writes(), 0);
}

#[test]
fn software_rc_recovers_internally() {
    let host = Host::new();
    let leaf = host.map(0x1000, PAGE_4K, 0x8000, PageTableEntry::EAA_RW);

    let translator = RadixTranslator::with_config(
        &host.memory,
        Hypervisor::Native,
        TranslatorConfig {
            rc_tracking: RcTracking::Software,
            ..Default::default()
        },
    );

    let translation = translator
        .translate(&host.registers, Ea(0x1008), AccessKind::Read)
        .unwrap();
    assert_eq!(translation.ra(), Ra(0x8008));
    assert_eq!(translation.protection(), Protection::R);
    assert!(leaf_at(&host.memory, leaf).reference());

    let translation = translator
        .translate(&host.registers, Ea(0x1008), AccessKind::Write)
        .unwrap();
    assert_eq!(translation.protection(), Protection::RW);
    assert!(leaf_at(&host.memory, leaf).change());
}

#[test]
fn rc_race_restarts_walk() {
    let host = Host::new();
    let leaf = host.map(0x1000, PAGE_4K, 0x8000, PageTableEntry::EAA_RW);
    let registers = host.registers;

    let memory = RacingMemory::new(host.memory, 1);
    let translator = RadixTranslator::new(&memory, Hypervisor::Native);

    let translation = translator
        .translate(&registers, Ea(0x1000), AccessKind::Read)
        .unwrap();
    assert_eq!(translation.ra(), Ra(0x8000));
    assert_eq!(memory.attempts(), 2);
    assert!(PageTableEntry(memory.read_u64(leaf).unwrap()).reference());
}

#[test]
fn endless_races_hit_retry_limit() {
    let host = Host::new();
    host.map(0x1000, PAGE_4K, 0x8000, PageTableEntry::EAA_RW);
    let registers = host.registers;

    let memory = RacingMemory::new(host.memory, usize::MAX);
    let translator = RadixTranslator::new(&memory, Hypervisor::Native);

    let err = translator
        .translate(&registers, Ea(0x1000), AccessKind::Read)
        .unwrap_err();

    assert_eq!(
        err,
        RadixError::RetryLimit {
            ea: Ea(0x1000),
            attempts: TranslatorConfig::DEFAULT_RETRY_LIMIT + 1,
        }
    );
    assert_eq!(memory.attempts(), TranslatorConfig::DEFAULT_RETRY_LIMIT + 1);
}

#[test]
fn memory_errors_surface() {
    let host = Host::new();
    let registers = Registers {
        ptcr: Ptcr(0x0fff_0000_0000_0000),
        ..host.registers
    };

    let err = host
        .translator()
        .translate(&registers, Ea(0x1000), AccessKind::Read)
        .unwrap_err();
    assert!(matches!(err, RadixError::Memory(_)));
    assert_eq!(err.fault(), None);
}

#[test]
fn debug_probe() {
    let host = Host::new();
    let leaf = host.map(0x1000, PAGE_4K, 0x8000, PageTableEntry::EAA_RW);
    let translator = host.translator();

    assert_eq!(
        translator.get_phys_page_debug(&host.registers, Ea(0x1234)),
        Some(Ra(0x8000))
    );
    assert_eq!(leaf_at(&host.memory, leaf).0 & (PageTableEntry::R | PageTableEntry::C), 0);

    assert_eq!(translator.get_phys_page_debug(&host.registers, Ea(0x2000)), None);

    let registers = Registers {
        msr: Msr(Msr::HV),
        ..host.registers
    };
    assert_eq!(
        translator.get_phys_page_debug(&registers, Ea(0xf000_0000_0000_5678)),
        Some(Ra(0x5000))
    );
}

#[test]
fn debug_probe_never_writes() {
    let guest = Guest::new();
    guest.map_process(0x1000_0000, PAGE_4K, 0x30_0000, PageTableEntry::EAA_RW);

    let memory = CountingMemory::new(&guest.memory);
    let translator = RadixTranslator::new(&memory, Hypervisor::Native);

    assert_eq!(
        translator.get_phys_page_debug(&guest.registers, Ea(0x1000_0042)),
        Some(Ra(GUEST_OFFSET + 0x30_0000))
    );
    assert_eq!(
        translator.get_phys_page_debug(&guest.registers, Ea(0x4000_0000_0000_0000)),
        None
    );
    assert_eq!(memory.writes(), 0);
}

fn eaa() -> impl Strategy<Value = u64> {
    prop_oneof![
        Just(PageTableEntry::EAA_R),
        Just(PageTableEntry::EAA_R | PageTableEntry::EAA_X),
        Just(PageTableEntry::EAA_RW),
        Just(PageTableEntry::EAA_RW | PageTableEntry::EAA_X),
    ]
}

fn levels() -> impl Strategy<Value = &'static [u64]> {
    prop_oneof![Just(PAGE_4K), Just(PAGE_2M), Just(PAGE_1G)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn two_stage_result_is_minimal(
        process_levels in levels(),
        process_eaa in eaa(),
        partition_levels in levels(),
        partition_eaa in eaa(),
        offset in 0u64..0x1000,
    ) {
        let guest = Guest::new();
        let flags = PageTableEntry::R | PageTableEntry::C;

        guest.map_process(0x2_0000_0000, process_levels, 0x4000_0000, process_eaa | flags);
        guest.map_partition(0x4000_0000, partition_levels, 0x8000_0000, partition_eaa | flags);

        let translation = guest
            .translator()
            .translate(&guest.registers, Ea(0x2_0000_0000 + offset), AccessKind::Read)
            .unwrap();

        let page_size = |levels: &[u64]| BITS - 13 - 9 * levels.len() as u64;
        let protection = |eaa: u64| PageTableEntry(eaa).authority();

        prop_assert_eq!(translation.ra(), Ra(0x8000_0000 + offset));
        prop_assert_eq!(
            translation.page_size(),
            page_size(process_levels).min(page_size(partition_levels))
        );
        prop_assert_eq!(
            translation.protection(),
            protection(process_eaa) & protection(partition_eaa)
        );
    }

    #[test]
    fn well_formed_trees_walk_to_the_leaf(
        sizes in prop::collection::vec(5u64..=9, 1..=5),
        page_size in 12u64..=17,
        address in any::<u64>(),
        ra in any::<u64>(),
    ) {
        let memory = FlatMemory::new(0x10_0000);
        let mut tree = TreeBuilder::new(&memory, 0x1000);

        let width = sizes.iter().sum::<u64>() + page_size;
        let address = address & ((1 << width) - 1);
        let mask = (1u64 << page_size) - 1;
        let ra = ra & PageTableEntry::RPN & !mask;

        let root = tree.root(sizes[0], width);
        tree.map(root, address, &sizes[1..], ra, RWX_LEAF);

        let walk = walk_tree(&memory, address, root.base, root.size, width).unwrap();
        prop_assert_eq!(walk.entries().len(), sizes.len());
        prop_assert!(walk.entries().len() as u64 <= width.div_ceil(5));
        prop_assert_eq!(walk.page_size(), page_size);
        prop_assert_eq!(walk.ra(), Ra(ra | (address & mask)));
    }

    #[test]
    fn arbitrary_trees_terminate(
        entries in prop::collection::vec(any::<u64>(), 512),
        root_size in 5u64..=9,
        width in 20u64..=62,
        address in any::<u64>(),
    ) {
        let memory = CountingMemory::new(FlatMemory::new(0x1000));
        for (index, value) in entries.iter().enumerate() {
            // Keep directory pointers inside memory, leave the rest random.
            let value = (value & !PageTableEntry::NLB) | (value & 0xf00);
            memory.write_u64(Ra(index as u64 * 8), value).unwrap();
        }
        memory.reset();

        let _ = walk_tree(&memory, address, Ra(0), root_size, width);
        prop_assert!(memory.reads() as u64 <= width.div_ceil(5));
    }
}
