//! Basic-block translation, the code cache, and branch chaining.
//!
//! One call translates exactly one guest basic block: instructions are
//! copied (or rewritten, for control transfers) into the code cache until
//! the first control transfer, inclusive. Direct branches go through
//! 16-byte trampoline stubs that push `(patch_site, target_pc)` and tail
//! into the direct resolver; the resolver translates the target on miss
//! and then patches the originating `disp32` so the trampoline is never
//! executed again. Indirect branches push the guest target and enter the
//! indirect dispatcher, which is never patched.
//!
//! # Cache geometry
//!
//! ```text
//! cache_base                                  cache_base + cache_size
//! |  blocks (16-byte aligned) -> out ... end <- trampolines (16 B)  |
//! ```
//!
//! `out <= end` always holds. When the block arena fills up or
//! `end - out` drops below the maximum block size, everything is flushed:
//! no incremental eviction, no per-site invalidation. Stale patched
//! displacements in already-running code are harmless because a flush
//! only happens at translation time, never mid-block; control re-enters
//! the dispatcher at the next indirect transfer or unresolved trampoline.
//!
//! # Patching and the fetch engine
//!
//! The resolver stores 4 bytes into an executable page that the single
//! guest thread later fetches from. On x86 hosts a same-thread store is
//! visible to the fetch engine without explicit synchronization; a port
//! to a stricter host must insert a serializing instruction after the
//! patch.

use host_core::layout::{DBT_BLOCKS_SIZE, DBT_CACHE_BASE, DBT_CACHE_SIZE};
use host_core::{EnterHost, TlsHost};
use tracing::{debug, error, info};

use crate::TranslateError;
use crate::bus::GuestBus;
use crate::decode::{Reader, parse_modrm, parse_prefixes};
use crate::emit::Asm;
use crate::insn::{Desc, Kind, ONE_BYTE, TWO_BYTE};
use crate::operand::{EAX, EBX, ECX, EDI, EDX, ESI, ESP, Rm, reg_mask};

/// Block start alignment; also the size of a trampoline stub.
const OUT_ALIGN: u32 = 16;
/// Buckets in the pc hash index.
const HASH_BUCKETS: usize = 4096;
/// Upper bound on one translated block; this much room is kept free
/// before translation starts.
const MAX_BLOCK_SIZE: u32 = 1024;

/// Addresses of the externals that emitted code calls into.
#[derive(Debug, Clone, Copy)]
pub struct ExternSymbols {
    /// Entry that pops `(target_pc, patch_site)` and resolves + patches.
    pub find_direct: u32,
    /// Entry that pops the guest target off the guest stack and resolves.
    pub find_indirect: u32,
    /// `int 0x80` handler.
    pub syscall_handler: u32,
    /// TLS slot-to-offset conversion, called by `mov gs, r/m`.
    pub tls_slot_to_offset: u32,
}

/// The three TLS offsets owned by the translator.
#[derive(Debug, Clone, Copy)]
pub struct TlsOffsets {
    /// Single-register spill slot.
    pub scratch: i32,
    /// Guest GS selector value.
    pub gs: i32,
    /// Base address corresponding to that selector.
    pub gs_addr: i32,
}

impl TlsOffsets {
    /// Allocate the three slots. They are never released.
    pub fn alloc(tls: &mut impl TlsHost) -> Self {
        let scratch_slot = tls.alloc_slot();
        let gs_slot = tls.alloc_slot();
        let gs_addr_slot = tls.alloc_slot();
        let offsets = Self {
            scratch: tls.slot_to_offset(scratch_slot),
            gs: tls.slot_to_offset(gs_slot),
            gs_addr: tls.slot_to_offset(gs_addr_slot),
        };
        info!(
            "tls slots: scratch {} ({:#x}), gs {} ({:#x}), gs_addr {} ({:#x})",
            scratch_slot, offsets.scratch, gs_slot, offsets.gs, gs_addr_slot, offsets.gs_addr,
        );
        offsets
    }
}

/// Translator configuration, fixed for the life of the process.
///
/// Every value here can end up embedded in emitted code as an absolute
/// `u32`, which is why they are fixed at init rather than injected per
/// call.
#[derive(Debug, Clone, Copy)]
pub struct DbtConfig {
    pub cache_base: u32,
    pub cache_size: u32,
    pub max_blocks: u32,
    pub symbols: ExternSymbols,
    pub tls: TlsOffsets,
}

impl DbtConfig {
    /// Configuration with the standard cache geometry.
    #[must_use]
    pub const fn new(symbols: ExternSymbols, tls: TlsOffsets) -> Self {
        Self {
            cache_base: DBT_CACHE_BASE,
            cache_size: DBT_CACHE_SIZE,
            max_blocks: DBT_BLOCKS_SIZE / OUT_ALIGN,
            symbols,
            tls,
        }
    }
}

/// A translated block. Read-only after creation; destroyed only by a
/// cache flush.
struct Block {
    pc: u32,
    start: u32,
    next: Option<u32>,
}

/// The translator: block arena, hash index and code cache.
pub struct Dbt {
    cfg: DbtConfig,
    cache: Vec<u8>,
    blocks: Vec<Block>,
    buckets: Vec<Option<u32>>,
    /// Forward cursor: next block emission address.
    out: u32,
    /// Backward cursor: last allocated trampoline address.
    end: u32,
}

const fn hash_pc(pc: u32) -> usize {
    (pc.wrapping_add(pc << 3).wrapping_add(pc << 9) as usize) % HASH_BUCKETS
}

impl Dbt {
    #[must_use]
    pub fn new(cfg: DbtConfig) -> Self {
        info!("initializing dbt subsystem");
        Self {
            cache: vec![0u8; cfg.cache_size as usize],
            blocks: Vec::new(),
            buckets: vec![None; HASH_BUCKETS],
            out: cfg.cache_base,
            end: cfg.cache_base + cfg.cache_size,
            cfg,
        }
    }

    /// Drop every block and reset the cache cursors.
    fn flush(&mut self) {
        self.buckets.iter_mut().for_each(|b| *b = None);
        self.blocks.clear();
        self.out = self.cfg.cache_base;
        self.end = self.cfg.cache_base + self.cfg.cache_size;
        debug!("dbt cache flushed");
    }

    /// Flush the cache. Translated code addresses obtained earlier are
    /// invalid afterwards.
    pub fn reset(&mut self) {
        self.flush();
    }

    fn lookup(&self, pc: u32) -> Option<u32> {
        let mut cursor = self.buckets[hash_pc(pc)];
        while let Some(idx) = cursor {
            let block = &self.blocks[idx as usize];
            if block.pc == pc {
                return Some(idx);
            }
            cursor = block.next;
        }
        None
    }

    /// Translate `pc` if it has no block yet and return the block's host
    /// entry address.
    pub fn find_next<B: GuestBus>(&mut self, bus: &B, pc: u32) -> Result<u32, TranslateError> {
        if let Some(idx) = self.lookup(pc) {
            return Ok(self.blocks[idx as usize].start);
        }
        let idx = self.translate(bus, pc)?;
        let bucket = hash_pc(pc);
        self.blocks[idx as usize].next = self.buckets[bucket];
        self.buckets[bucket] = Some(idx);
        Ok(self.blocks[idx as usize].start)
    }

    /// As [`Dbt::find_next`], then patch the originating branch's
    /// `disp32` at `patch_site` so the next execution bypasses the
    /// trampoline.
    pub fn find_direct<B: GuestBus>(
        &mut self,
        bus: &B,
        pc: u32,
        patch_site: u32,
    ) -> Result<u32, TranslateError> {
        let start = self.find_next(bus, pc)?;
        let rel = start.wrapping_sub(patch_site.wrapping_add(4));
        let off = (patch_site - self.cfg.cache_base) as usize;
        self.cache[off..off + 4].copy_from_slice(&rel.to_le_bytes());
        Ok(start)
    }

    /// Enter translated code for the first time. On a real host this
    /// does not return.
    pub fn run<B: GuestBus, H: EnterHost>(
        &mut self,
        bus: &B,
        host: &mut H,
        pc: u32,
        sp: u32,
    ) -> Result<(), TranslateError> {
        let entry = self.find_next(bus, pc)?;
        info!(
            "dbt: entering generated code at {entry:#x} (guest pc {pc:#x}, sp {sp:#x})",
        );
        host.enter(entry, sp);
        Ok(())
    }

    /// Allocate (or find) the direct trampoline for branch target `pc`.
    ///
    /// If the block already exists the branch can go straight to it and
    /// no stub is built. Otherwise a 16-byte stub is carved off the high
    /// end of the cache: `push patch_site; push pc; jmp resolver` — 15
    /// bytes, guaranteed to fit the stub slot.
    fn direct_trampoline(&mut self, cache: &mut [u8], pc: u32, patch_site: u32) -> u32 {
        if let Some(idx) = self.lookup(pc) {
            return self.blocks[idx as usize].start;
        }
        self.end -= OUT_ALIGN;
        let mut a = Asm::new(cache, self.cfg.cache_base, self.end);
        a.push_imm32(patch_site);
        a.push_imm32(pc);
        a.jmp(self.cfg.symbols.find_direct);
        self.end
    }

    /// Translate one basic block starting at `pc`, flushing first if the
    /// arena or the cache is out of room. Returns the new block's index.
    fn translate<B: GuestBus>(&mut self, bus: &B, pc: u32) -> Result<u32, TranslateError> {
        if self.blocks.len() as u32 == self.cfg.max_blocks || self.end - self.out < MAX_BLOCK_SIZE
        {
            self.flush();
        }
        let start = (self.out + OUT_ALIGN - 1) & !(OUT_ALIGN - 1);
        let mut cache = std::mem::take(&mut self.cache);
        let result = self.translate_block(bus, &mut cache, pc, start);
        self.cache = cache;
        let out = result?;
        debug_assert!(out <= self.end, "block emission ran into the stub area");
        self.out = out;
        self.blocks.push(Block {
            pc,
            start,
            next: None,
        });
        Ok(self.blocks.len() as u32 - 1)
    }

    /// Emit the body of one block; returns the final output cursor.
    fn translate_block<B: GuestBus>(
        &mut self,
        bus: &B,
        cache: &mut [u8],
        pc: u32,
        start: u32,
    ) -> Result<u32, TranslateError> {
        let base = self.cfg.cache_base;
        let syms = self.cfg.symbols;
        let tls = self.cfg.tls;
        let mut r = Reader::new(bus, pc);
        let mut out = start;
        loop {
            let ins_pc = r.pc;
            let (prefixes, first) = parse_prefixes(&mut r)?;
            let mut escape = false;
            let mut opcode = first;
            let mut desc: &Desc = if opcode == 0x0F {
                escape = true;
                opcode = r.u8();
                &TWO_BYTE[opcode as usize]
            } else {
                &ONE_BYTE[opcode as usize]
            };

            let mut reg = None;
            let mut rm = Rm::reg(0);
            if desc.has_modrm {
                let (rg, m) = parse_modrm(&mut r);
                reg = Some(rg);
                rm = m;
            }

            // Extension groups re-dispatch on modrm.r.
            while desc.kind == Kind::Extension {
                match (desc.ext, reg) {
                    (Some(table), Some(rg)) => desc = &table[rg as usize],
                    _ => {
                        error!("malformed extension descriptor for opcode {opcode:#04x}");
                        return Err(TranslateError::UnknownOpcode { opcode, pc: ins_pc });
                    }
                }
            }

            let imm_bytes = desc.imm.bytes(prefixes.opsize);

            match desc.kind {
                Kind::Unknown => {
                    error!("unknown opcode {opcode:#04x} at {ins_pc:#x}");
                    return Err(TranslateError::UnknownOpcode { opcode, pc: ins_pc });
                }
                Kind::Invalid => {
                    error!("invalid opcode {opcode:#04x} at {ins_pc:#x}");
                    return Err(TranslateError::InvalidOpcode { opcode, pc: ins_pc });
                }
                Kind::Privileged => {
                    error!("privileged opcode {opcode:#04x} at {ins_pc:#x}");
                    return Err(TranslateError::PrivilegedOpcode { opcode, pc: ins_pc });
                }
                Kind::Unsupported | Kind::Extension => {
                    error!("unsupported opcode {opcode:#04x} at {ins_pc:#x}");
                    return Err(TranslateError::UnsupportedOpcode { opcode, pc: ins_pc });
                }

                Kind::Normal => {
                    let imm_start = r.pc;
                    r.pc = r.pc.wrapping_add(u32::from(imm_bytes));

                    let mut a = Asm::new(cache, base, out);
                    if prefixes.opsize {
                        a.u8(0x66);
                    }
                    if let Some(rep) = prefixes.rep {
                        a.u8(rep);
                    }
                    if escape {
                        a.u8(0x0F);
                    }
                    a.u8(opcode);
                    if desc.has_modrm {
                        a.modrm_sib(reg.unwrap_or(0), rm)?;
                    }
                    for i in 0..u32::from(imm_bytes) {
                        a.u8(bus.fetch(imm_start.wrapping_add(i)));
                    }
                    out = a.addr();
                }

                Kind::CallDirect => {
                    let rel = r.rel(imm_bytes);
                    let dest = r.pc.wrapping_add(rel as u32);
                    let mut a = Asm::new(cache, base, out);
                    a.push_imm32(r.pc);
                    out = a.addr();
                    let patch_site = out + 1;
                    let tramp = self.direct_trampoline(cache, dest, patch_site);
                    let mut a = Asm::new(cache, base, out);
                    a.jmp(tramp);
                    out = a.addr();
                    break;
                }

                Kind::CallIndirect => {
                    let mut a = Asm::new(cache, base, out);
                    a.push_imm32(r.pc);
                    // The pushed return address moved esp; compensate
                    // esp-relative targets.
                    let mut target = rm;
                    if target.base == Some(ESP) {
                        target.disp = target.disp.wrapping_add(4);
                    }
                    a.push_rm(target)?;
                    a.jmp(syms.find_indirect);
                    out = a.addr();
                    break;
                }

                Kind::Ret => {
                    let mut a = Asm::new(cache, base, out);
                    a.jmp(syms.find_indirect);
                    out = a.addr();
                    break;
                }

                Kind::RetImm16 => {
                    let count = i32::from(r.u16());
                    // The return address must hop over the popped
                    // arguments: `pop [esp + count - 4]`, where esp has
                    // already grown by the time the store happens, then
                    // advance esp past the arguments.
                    let slot = Rm::mem(ESP, count - 4);
                    let mut a = Asm::new(cache, base, out);
                    a.pop_rm(slot)?;
                    a.lea(ESP, slot)?;
                    a.jmp(syms.find_indirect);
                    out = a.addr();
                    break;
                }

                Kind::JmpDirect => {
                    let rel = r.rel(imm_bytes);
                    let dest = r.pc.wrapping_add(rel as u32);
                    let patch_site = out + 1;
                    let tramp = self.direct_trampoline(cache, dest, patch_site);
                    let mut a = Asm::new(cache, base, out);
                    a.jmp(tramp);
                    out = a.addr();
                    break;
                }

                Kind::JmpIndirect => {
                    let mut a = Asm::new(cache, base, out);
                    a.push_rm(rm)?;
                    a.jmp(syms.find_indirect);
                    out = a.addr();
                    break;
                }

                Kind::Jcc(cond) => {
                    let rel = r.rel(imm_bytes);
                    let taken = r.pc.wrapping_add(rel as u32);
                    let not_taken = r.pc;
                    let patch_taken = out + 2;
                    let tramp_taken = self.direct_trampoline(cache, taken, patch_taken);
                    let mut a = Asm::new(cache, base, out);
                    a.jcc(cond, tramp_taken);
                    out = a.addr();
                    let patch_not_taken = out + 1;
                    let tramp_not_taken =
                        self.direct_trampoline(cache, not_taken, patch_not_taken);
                    let mut a = Asm::new(cache, base, out);
                    a.jmp(tramp_not_taken);
                    out = a.addr();
                    break;
                }

                Kind::JccRel8 => {
                    // LOOP/LOOPE/LOOPNE/JECXZ only take rel8, so keep the
                    // original instruction and fan out locally:
                    //   op $+2; jmp $+5; jmp taken; jmp not_taken
                    let rel = r.rel(imm_bytes);
                    let taken = r.pc.wrapping_add(rel as u32);
                    let not_taken = r.pc;
                    let mut a = Asm::new(cache, base, out);
                    a.u8(opcode);
                    a.u8(2); // over the jmp rel8
                    a.u8(0xEB);
                    a.u8(5); // over the jmp rel32
                    out = a.addr();
                    let patch_taken = out + 1;
                    let tramp_taken = self.direct_trampoline(cache, taken, patch_taken);
                    let mut a = Asm::new(cache, base, out);
                    a.jmp(tramp_taken);
                    out = a.addr();
                    let patch_not_taken = out + 1;
                    let tramp_not_taken =
                        self.direct_trampoline(cache, not_taken, patch_not_taken);
                    let mut a = Asm::new(cache, base, out);
                    a.jmp(tramp_not_taken);
                    out = a.addr();
                    break;
                }

                Kind::Int => {
                    let vector = r.u8();
                    if vector != 0x80 {
                        error!("int {vector:#04x} at {ins_pc:#x} not supported");
                        return Err(TranslateError::UnsupportedInt {
                            vector,
                            pc: ins_pc,
                        });
                    }
                    let mut a = Asm::new(cache, base, out);
                    a.call(syms.syscall_handler);
                    out = a.addr();
                }

                Kind::MovFromSeg => {
                    let seg = reg.unwrap_or(0);
                    if seg != 5 {
                        error!("mov from segment {seg} at {ins_pc:#x} not supported");
                        return Err(TranslateError::UnsupportedSegment { seg, pc: ins_pc });
                    }
                    let temp = find_unused_register(desc, reg, rm).ok_or_else(|| {
                        error!("no usable scratch register at {ins_pc:#x}");
                        TranslateError::NoScratchRegister { pc: ins_pc }
                    })?;
                    let mut a = Asm::new(cache, base, out);
                    // Spill, load the stored selector, deliver, restore.
                    a.fs_prefix();
                    a.mov_rm_r32(Rm::disp32(tls.scratch), temp)?;
                    a.fs_prefix();
                    a.mov_r_rm32(temp, Rm::disp32(tls.gs))?;
                    a.mov_rm_r32(rm, temp)?;
                    a.fs_prefix();
                    a.mov_r_rm32(temp, Rm::disp32(tls.scratch))?;
                    out = a.addr();
                }

                Kind::MovToSeg => {
                    let seg = reg.unwrap_or(0);
                    if seg != 5 {
                        error!("mov to segment {seg} at {ins_pc:#x} not supported");
                        return Err(TranslateError::UnsupportedSegment { seg, pc: ins_pc });
                    }
                    let temp = find_unused_register(desc, reg, rm).ok_or_else(|| {
                        error!("no usable scratch register at {ins_pc:#x}");
                        TranslateError::NoScratchRegister { pc: ins_pc }
                    })?;
                    let mut a = Asm::new(cache, base, out);
                    a.fs_prefix();
                    a.mov_rm_r32(Rm::disp32(tls.scratch), temp)?;
                    a.mov_r_rm32(temp, rm)?;
                    // The helper call clobbers flags and the caller-saved
                    // registers; preserve the guest's view of both.
                    a.pushfd();
                    a.fs_prefix();
                    a.mov_rm_r32(Rm::disp32(tls.gs), temp)?;
                    a.shr_rm32(Rm::reg(temp), 3)?;
                    a.push_rm(Rm::reg(EAX))?;
                    a.push_rm(Rm::reg(ECX))?;
                    a.push_rm(Rm::reg(EDX))?;
                    a.push_rm(Rm::reg(temp))?;
                    a.call(syms.tls_slot_to_offset);
                    // The returned offset names the slot holding the base
                    // address for this selector.
                    a.fs_prefix();
                    a.mov_r_rm32(temp, Rm::mem(EAX, 0))?;
                    a.fs_prefix();
                    a.mov_rm_r32(Rm::disp32(tls.gs_addr), temp)?;
                    a.lea(ESP, Rm::mem(ESP, 4))?;
                    a.pop_rm(Rm::reg(EDX))?;
                    a.pop_rm(Rm::reg(ECX))?;
                    a.pop_rm(Rm::reg(EAX))?;
                    a.popfd();
                    a.fs_prefix();
                    a.mov_r_rm32(temp, Rm::disp32(tls.scratch))?;
                    out = a.addr();
                }
            }
        }
        Ok(out)
    }
}

/// Pick the lowest-numbered general register an instruction does not
/// touch, for use as a temporary. The stack and frame pointers are never
/// candidates.
fn find_unused_register(desc: &Desc, reg: Option<u8>, rm: Rm) -> Option<u8> {
    let mut used = desc.reads | desc.writes;
    if let Some(r) = reg {
        used |= reg_mask(r);
    }
    if let Some(b) = rm.base {
        used |= reg_mask(b);
    }
    if let Some(i) = rm.index {
        used |= reg_mask(i);
    }
    [EAX, ECX, EDX, EBX, ESI, EDI]
        .into_iter()
        .find(|&r| used & reg_mask(r) == 0)
}

#[cfg(feature = "test-utils")]
impl Dbt {
    /// Raw cache contents.
    #[must_use]
    pub fn cache_bytes(&self) -> &[u8] {
        &self.cache
    }

    /// Cache base address.
    #[must_use]
    pub const fn cache_base(&self) -> u32 {
        self.cfg.cache_base
    }

    /// Current `(out, end)` cursors.
    #[must_use]
    pub const fn cursors(&self) -> (u32, u32) {
        (self.out, self.end)
    }

    /// Number of live blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Entry address of `pc`'s block, without translating.
    #[must_use]
    pub fn entry_of(&self, pc: u32) -> Option<u32> {
        self.lookup(pc).map(|idx| self.blocks[idx as usize].start)
    }
}
