//! Simulated FX Pak Pro for tests
//!
//! Implements [`Transport`] by decoding USBA frames against in-memory state:
//! 16MB of device space, the 64K command space, a small filesystem. When a
//! VGET polls the armed `$2C00` slot the console "takes an NMI" and the staged
//! routine runs on a tiny 65816 interpreter that knows the handful of
//! instructions the copy routine uses.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use byteorder::{BigEndian, ByteOrder};
use hashbrown::{HashMap, HashSet};

use crate::deadline::Deadline;
use crate::error::{DeviceError, Result};
use crate::mapping::PAK_WRAM_BASE;

use super::packet::{self, FRAME_SIZE, MAGIC, Opcode, Space, VFRAME_SIZE};
use super::transport::Transport;

const EXE_SLOT: usize = 0x2C00;
const EXE_SLOT_END: usize = 0x2E00;

/// Fault to inject into the next response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    BadMagic,
    Status(u8),
}

/// Observable cartridge state
pub struct Cart {
    pub memory: Vec<u8>,
    pub cmd: Vec<u8>,
    pub files: HashMap<String, Vec<u8>>,
    pub dirs: HashSet<String>,
    pub booted: Option<String>,
    pub resets: usize,
    pub menu_resets: usize,
    /// Chunk tuples of every VGET frame received
    pub vgets: Vec<(u8, Vec<(u32, u8)>)>,
    /// Chunk tuples of every VPUT frame received
    pub vputs: Vec<(u8, Vec<(u32, u8)>)>,
    pub nmi_runs: usize,
    /// When false the console never services the slot
    pub nmi_enabled: bool,
    pub fault: Option<Fault>,
}

impl Default for Cart {
    fn default() -> Self {
        let mut dirs = HashSet::new();
        dirs.insert("/".to_string());
        Self {
            memory: vec![0; 0x100_0000],
            cmd: vec![0; 0x1_0000],
            files: HashMap::new(),
            dirs,
            booted: None,
            resets: 0,
            menu_resets: 0,
            vgets: Vec::new(),
            vputs: Vec::new(),
            nmi_runs: 0,
            nmi_enabled: true,
            fault: None,
        }
    }
}

/// Shared handle to a simulated cartridge
#[derive(Clone, Default)]
pub struct FakeCart(Arc<Mutex<Cart>>);

impl FakeCart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, Cart> {
        self.0.lock().unwrap()
    }

    /// A fresh host-side connection to this cartridge
    pub fn transport(&self) -> Box<dyn Transport> {
        Box::new(FakeTransport {
            cart: Arc::clone(&self.0),
            inbox: Vec::new(),
            outbox: VecDeque::new(),
            pending: Pending::Command,
            closed: false,
        })
    }
}

enum Pending {
    Command,
    VPutData { space: u8, chunks: Vec<(u32, u8)>, need: usize },
    FileData { path: String, size: usize, need: usize },
}

struct FakeTransport {
    cart: Arc<Mutex<Cart>>,
    inbox: Vec<u8>,
    outbox: VecDeque<u8>,
    pending: Pending,
    closed: bool,
}

impl Transport for FakeTransport {
    fn write_all(&mut self, buf: &[u8], _deadline: Deadline) -> Result<()> {
        if self.closed {
            return Err(DeviceError::Closed);
        }
        self.inbox.extend_from_slice(buf);
        self.process();
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8], _deadline: Deadline) -> Result<()> {
        if self.closed {
            return Err(DeviceError::Closed);
        }
        if self.outbox.len() < buf.len() {
            return Err(DeviceError::Timeout("fake cartridge response".to_string()));
        }
        for b in buf.iter_mut() {
            *b = self.outbox.pop_front().unwrap();
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

impl FakeTransport {
    fn process(&mut self) {
        loop {
            match &self.pending {
                Pending::Command => {
                    if self.inbox.len() < 7 {
                        return;
                    }
                    assert_eq!(&self.inbox[..4], MAGIC, "host sent a frame without magic");
                    let vectored = self.inbox[4] == Opcode::VGet as u8 || self.inbox[4] == Opcode::VPut as u8;
                    let len = if vectored { VFRAME_SIZE } else { FRAME_SIZE };
                    if self.inbox.len() < len {
                        return;
                    }
                    let frame: Vec<u8> = self.inbox.drain(..len).collect();
                    self.command(&frame);
                }
                Pending::VPutData { need, .. } | Pending::FileData { need, .. } => {
                    let need = *need;
                    if self.inbox.len() < need {
                        return;
                    }
                    let data: Vec<u8> = self.inbox.drain(..need).collect();
                    match std::mem::replace(&mut self.pending, Pending::Command) {
                        Pending::VPutData { space, chunks, .. } => self.finish_vput(space, &chunks, &data),
                        Pending::FileData { path, size, .. } => {
                            self.cart.lock().unwrap().files.insert(path, data[..size].to_vec());
                        }
                        Pending::Command => unreachable!(),
                    }
                }
            }
        }
    }

    /// Queue a response header; returns false if a fault made it an error
    fn respond(&mut self, len: usize, status: u8, fill: impl FnOnce(&mut [u8])) -> bool {
        let mut frame = vec![0u8; len];
        frame[..4].copy_from_slice(MAGIC);
        frame[4] = Opcode::Response as u8;
        frame[5] = status;
        fill(&mut frame);

        match self.cart.lock().unwrap().fault.take() {
            Some(Fault::BadMagic) => frame[0] = b'X',
            Some(Fault::Status(code)) => frame[5] = code,
            None => {}
        }
        let ok = &frame[..4] == MAGIC && frame[5] == 0;
        self.outbox.extend(frame);
        ok
    }

    fn send_blocks(&mut self, data: &[u8], block: usize) {
        self.outbox.extend(data.iter().copied());
        let pad = packet::padded_len(data.len(), block) - data.len();
        self.outbox.extend(std::iter::repeat_n(0u8, pad));
    }

    fn command(&mut self, frame: &[u8]) {
        let opcode = frame[4];
        let space = frame[5];
        let name = packet::read_cstr(frame, 256);

        match opcode {
            op if op == Opcode::VGet as u8 => self.vget(space, parse_chunks(frame)),
            op if op == Opcode::VPut as u8 => {
                let chunks = parse_chunks(frame);
                let total: usize = chunks.iter().map(|&(_, s)| s as usize).sum();
                self.cart.lock().unwrap().vputs.push((space, chunks.clone()));
                self.pending = Pending::VPutData {
                    space,
                    chunks,
                    need: packet::padded_len(total, VFRAME_SIZE),
                };
            }
            op if op == Opcode::Get as u8 => {
                let file = self.cart.lock().unwrap().files.get(&name).cloned();
                match file {
                    Some(data) => {
                        let size = data.len() as u32;
                        if self.respond(FRAME_SIZE, 0, |f| BigEndian::write_u32(&mut f[252..], size)) {
                            self.send_blocks(&data, FRAME_SIZE);
                        }
                    }
                    None => {
                        self.respond(FRAME_SIZE, 1, |_| {});
                    }
                }
            }
            op if op == Opcode::Put as u8 => {
                let size = BigEndian::read_u32(&frame[252..]) as usize;
                if self.respond(FRAME_SIZE, 0, |_| {}) {
                    self.pending = Pending::FileData {
                        path: name,
                        size,
                        need: packet::padded_len(size, FRAME_SIZE),
                    };
                }
            }
            op if op == Opcode::Ls as u8 => self.list(&name),
            op if op == Opcode::Mkdir as u8 => {
                self.cart.lock().unwrap().dirs.insert(name);
                self.respond(FRAME_SIZE, 0, |_| {});
            }
            op if op == Opcode::Rm as u8 => {
                let removed = {
                    let mut cart = self.cart.lock().unwrap();
                    cart.files.remove(&name).is_some() || cart.dirs.remove(&name)
                };
                self.respond(FRAME_SIZE, if removed { 0 } else { 1 }, |_| {});
            }
            op if op == Opcode::Mv as u8 => {
                let new_name = packet::read_cstr(frame, 8);
                let moved = {
                    let mut cart = self.cart.lock().unwrap();
                    match cart.files.remove(&name) {
                        Some(data) => {
                            let target = join(parent(&name), &new_name);
                            cart.files.insert(target, data);
                            true
                        }
                        None => false,
                    }
                };
                self.respond(FRAME_SIZE, if moved { 0 } else { 1 }, |_| {});
            }
            op if op == Opcode::Boot as u8 => {
                let found = {
                    let mut cart = self.cart.lock().unwrap();
                    let found = cart.files.contains_key(&name);
                    if found {
                        cart.booted = Some(name);
                    }
                    found
                };
                self.respond(FRAME_SIZE, if found { 0 } else { 1 }, |_| {});
            }
            op if op == Opcode::Reset as u8 => {
                self.cart.lock().unwrap().resets += 1;
                self.respond(FRAME_SIZE, 0, |_| {});
            }
            op if op == Opcode::MenuReset as u8 => {
                {
                    let mut cart = self.cart.lock().unwrap();
                    cart.menu_resets += 1;
                    cart.booted = None;
                }
                self.respond(FRAME_SIZE, 0, |_| {});
            }
            op if op == Opcode::Info as u8 => {
                let rom = self
                    .cart
                    .lock()
                    .unwrap()
                    .booted
                    .clone()
                    .unwrap_or_else(|| "/sd2snes/m3nu.bin".to_string());
                self.respond(FRAME_SIZE, 0, |f| {
                    f[6] = 0x01;
                    f[16..16 + rom.len()].copy_from_slice(rom.as_bytes());
                    BigEndian::write_u32(&mut f[256..], 0x8000_0011);
                    f[260..265].copy_from_slice(b"1.11b");
                });
            }
            other => panic!("fake cartridge got unhandled opcode {other:#04x}"),
        }
    }

    fn vget(&mut self, space: u8, chunks: Vec<(u32, u8)>) {
        let data = {
            let mut cart = self.cart.lock().unwrap();
            cart.vgets.push((space, chunks.clone()));

            let polls_slot = space == Space::Cmd as u8
                && chunks
                    .iter()
                    .any(|&(a, s)| (a as usize) <= EXE_SLOT && EXE_SLOT < a as usize + s as usize);
            if polls_slot && cart.cmd[EXE_SLOT] != 0 && cart.nmi_enabled {
                run_nmi(&mut cart);
            }

            let mut data = Vec::new();
            for &(address, size) in &chunks {
                let mem = if space == Space::Cmd as u8 { &cart.cmd } else { &cart.memory };
                let start = address as usize;
                data.extend_from_slice(&mem[start..start + size as usize]);
            }
            data
        };
        if self.respond(VFRAME_SIZE, 0, |_| {}) {
            self.send_blocks(&data, VFRAME_SIZE);
        }
    }

    fn finish_vput(&mut self, space: u8, chunks: &[(u32, u8)], data: &[u8]) {
        {
            let mut cart = self.cart.lock().unwrap();
            let mut at = 0;
            for &(address, size) in chunks {
                let size = size as usize;
                let mem = if space == Space::Cmd as u8 { &mut cart.cmd } else { &mut cart.memory };
                let start = address as usize;
                mem[start..start + size].copy_from_slice(&data[at..at + size]);
                at += size;
            }
        }
        self.respond(VFRAME_SIZE, 0, |_| {});
    }

    fn list(&mut self, path: &str) {
        let entries = {
            let cart = self.cart.lock().unwrap();
            if !cart.dirs.contains(path) {
                None
            } else {
                let mut entries: Vec<(u8, String)> = cart
                    .dirs
                    .iter()
                    .filter(|d| d.as_str() != "/" && parent(d) == path)
                    .map(|d| (0u8, basename(d).to_string()))
                    .chain(
                        cart.files
                            .keys()
                            .filter(|f| parent(f) == path)
                            .map(|f| (1u8, basename(f).to_string())),
                    )
                    .collect();
                entries.sort();
                Some(entries)
            }
        };

        let Some(entries) = entries else {
            self.respond(FRAME_SIZE, 1, |_| {});
            return;
        };
        if !self.respond(FRAME_SIZE, 0, |_| {}) {
            return;
        }

        let mut block = Vec::with_capacity(FRAME_SIZE);
        for (kind, name) in entries {
            // entry plus room for a trailing marker
            if block.len() + name.len() + 3 > FRAME_SIZE {
                block.push(0x02);
                block.resize(FRAME_SIZE, 0);
                self.outbox.extend(block.drain(..));
            }
            block.push(kind);
            block.extend_from_slice(name.as_bytes());
            block.push(0);
        }
        block.push(0xFF);
        block.resize(FRAME_SIZE, 0);
        self.outbox.extend(block);
    }
}

fn parse_chunks(frame: &[u8]) -> Vec<(u32, u8)> {
    (0..8)
        .map(|i| 32 + i * 4)
        .filter(|&at| frame[at] != 0)
        .map(|at| (BigEndian::read_u24(&frame[at + 1..at + 4]), frame[at]))
        .collect()
}

fn parent(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((dir, _)) => dir,
    }
}

fn basename(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

// ============================================================================
// 65816 interpreter for the injected routine
// ============================================================================

struct Cpu {
    pc: u16,
    a: u16,
    x: u16,
    y: u16,
    p: u8,
    dbr: u8,
    stack: Vec<u8>,
}

impl Cpu {
    fn m8(&self) -> bool {
        self.p & 0x20 != 0
    }

    fn x8(&self) -> bool {
        self.p & 0x10 != 0
    }

    fn push16(&mut self, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.stack.push(hi);
        self.stack.push(lo);
    }

    fn pull16(&mut self) -> u16 {
        let lo = self.stack.pop().unwrap();
        let hi = self.stack.pop().unwrap();
        u16::from_le_bytes([lo, hi])
    }

    fn push_sized(&mut self, value: u16, byte: bool) {
        if byte {
            self.stack.push(value as u8);
        } else {
            self.push16(value);
        }
    }

    fn pull_sized(&mut self, old: u16, byte: bool) -> u16 {
        if byte {
            (old & 0xFF00) | self.stack.pop().unwrap() as u16
        } else {
            self.pull16()
        }
    }
}

fn bus_index(bank: u8, offset: u16) -> (bool, usize) {
    match bank {
        0x00 if (EXE_SLOT..EXE_SLOT_END).contains(&(offset as usize)) => (true, offset as usize),
        0x7E | 0x7F => (
            false,
            PAK_WRAM_BASE as usize + (((bank - 0x7E) as usize) << 16) + offset as usize,
        ),
        _ => panic!("routine touched unmapped ${bank:02x}:{offset:04x}"),
    }
}

fn bus_read(cart: &Cart, bank: u8, offset: u16) -> u8 {
    match bus_index(bank, offset) {
        (true, i) => cart.cmd[i],
        (false, i) => cart.memory[i],
    }
}

fn bus_write(cart: &mut Cart, bank: u8, offset: u16, value: u8) {
    match bus_index(bank, offset) {
        (true, i) => cart.cmd[i] = value,
        (false, i) => cart.memory[i] = value,
    }
}

/// Run the routine armed at `$2C00` until it jumps to the original NMI
fn run_nmi(cart: &mut Cart) {
    let mut cpu = Cpu {
        pc: EXE_SLOT as u16,
        a: 0x1234,
        x: 0x5678,
        y: 0x9ABC,
        p: 0x30,
        dbr: 0x7E,
        stack: Vec::new(),
    };
    let saved = (cpu.a, cpu.x, cpu.y, cpu.p, cpu.dbr);

    let imm8 = |cart: &Cart, cpu: &Cpu| bus_read(cart, 0, cpu.pc + 1);
    let imm16 = |cart: &Cart, cpu: &Cpu| {
        u16::from_le_bytes([bus_read(cart, 0, cpu.pc + 1), bus_read(cart, 0, cpu.pc + 2)])
    };

    for _ in 0..100_000 {
        let op = bus_read(cart, 0, cpu.pc);
        match op {
            0x08 => {
                cpu.stack.push(cpu.p);
                cpu.pc += 1;
            }
            0x28 => {
                cpu.p = cpu.stack.pop().unwrap();
                cpu.pc += 1;
            }
            0xC2 => {
                cpu.p &= !imm8(cart, &cpu);
                cpu.pc += 2;
            }
            0xE2 => {
                cpu.p |= imm8(cart, &cpu);
                cpu.pc += 2;
            }
            0x48 => {
                cpu.push_sized(cpu.a, cpu.m8());
                cpu.pc += 1;
            }
            0x68 => {
                cpu.a = cpu.pull_sized(cpu.a, cpu.m8());
                cpu.pc += 1;
            }
            0xDA => {
                cpu.push_sized(cpu.x, cpu.x8());
                cpu.pc += 1;
            }
            0xFA => {
                cpu.x = cpu.pull_sized(cpu.x, cpu.x8());
                cpu.pc += 1;
            }
            0x5A => {
                cpu.push_sized(cpu.y, cpu.x8());
                cpu.pc += 1;
            }
            0x7A => {
                cpu.y = cpu.pull_sized(cpu.y, cpu.x8());
                cpu.pc += 1;
            }
            0x8B => {
                cpu.stack.push(cpu.dbr);
                cpu.pc += 1;
            }
            0xAB => {
                cpu.dbr = cpu.stack.pop().unwrap();
                cpu.pc += 1;
            }
            0xA9 | 0xA2 | 0xA0 => {
                let byte = if op == 0xA9 { cpu.m8() } else { cpu.x8() };
                let value = if byte { imm8(cart, &cpu) as u16 } else { imm16(cart, &cpu) };
                let reg = match op {
                    0xA9 => &mut cpu.a,
                    0xA2 => &mut cpu.x,
                    _ => &mut cpu.y,
                };
                *reg = if byte { (*reg & 0xFF00) | value } else { value };
                cpu.pc += if byte { 2 } else { 3 };
            }
            0x54 => {
                let dst = bus_read(cart, 0, cpu.pc + 1);
                let src = bus_read(cart, 0, cpu.pc + 2);
                loop {
                    let value = bus_read(cart, src, cpu.x);
                    bus_write(cart, dst, cpu.y, value);
                    cpu.x = cpu.x.wrapping_add(1);
                    cpu.y = cpu.y.wrapping_add(1);
                    cpu.a = cpu.a.wrapping_sub(1);
                    if cpu.a == 0xFFFF {
                        break;
                    }
                }
                cpu.dbr = dst;
                cpu.pc += 3;
            }
            0x8F => {
                let lo = bus_read(cart, 0, cpu.pc + 1);
                let hi = bus_read(cart, 0, cpu.pc + 2);
                let bank = bus_read(cart, 0, cpu.pc + 3);
                let offset = u16::from_le_bytes([lo, hi]);
                bus_write(cart, bank, offset, cpu.a as u8);
                if !cpu.m8() {
                    bus_write(cart, bank, offset + 1, (cpu.a >> 8) as u8);
                }
                cpu.pc += 4;
            }
            0x6C => {
                assert!(cpu.stack.is_empty(), "routine left the stack unbalanced");
                assert_eq!((cpu.a, cpu.x, cpu.y, cpu.p, cpu.dbr), saved, "routine clobbered registers");
                cart.nmi_runs += 1;
                return;
            }
            other => panic!("interpreter does not know opcode {other:#04x} at ${:04x}", cpu.pc),
        }
    }
    panic!("injected routine never returned");
}
