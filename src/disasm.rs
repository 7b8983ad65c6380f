use log::{debug, warn};
use nom::{
    IResult,
    branch::alt,
    bytes::complete::tag,
    character::complete::{alphanumeric0, char, digit1, satisfy, space0, space1},
    combinator::{all_consuming, map, opt, recognize},
    sequence::{delimited, pair, terminated},
};

use crate::catalog::{Catalog, EventIdx};
use crate::error::{Error, Result};
use crate::num_util::int_literal;
use crate::state::{CanonicalRecord, EventID, Value};

// Membership sets are keyed by family: the mnemonic without its width
// suffix, so vle8/vle16/vle32/vle64 all classify as vle.
const NO_DEST: &[&str] = &[
    "vse", "vsse", "vsuxei", "vsoxei", "vs1r", "vs2r", "vs4r", "vs8r", "vsm", "sb", "sh", "sw",
    "sd", "fsh", "fsw", "fsd", "c.sw", "c.sd", "c.fsd", "c.swsp", "c.sdsp", "c.fsdsp", "beq",
    "bne", "blt", "bge", "bltu", "bgeu", "beqz", "bnez", "bltz", "bgez", "blez", "bgtz", "bgt",
    "ble", "bgtu", "bleu", "c.beqz", "c.bnez", "j", "jr", "c.j", "c.jr",
];

const WITH_ADDR: &[&str] = &[
    "vle", "vse", "vlse", "vsse", "vluxei", "vloxei", "vsuxei", "vsoxei", "vl1re", "vl2re",
    "vl4re", "vl8re", "vs1r", "vs2r", "vs4r", "vs8r", "vlm", "vsm", "lb", "lh", "lw", "ld", "lbu",
    "lhu", "lwu", "flh", "flw", "fld", "sb", "sh", "sw", "sd", "fsh", "fsw", "fsd", "c.lw",
    "c.ld", "c.sw", "c.sd", "c.lwsp", "c.ldsp", "c.swsp", "c.sdsp", "c.fld", "c.fsd", "c.fldsp",
    "c.fsdsp",
];

const SETVEC: &[&str] = &["vsetvli", "vsetivli", "vsetvl"];

const OVERWRITE_SRC: &[&str] = &[
    "vmacc", "vnmsac", "vmadd", "vnmsub", "vwmaccu", "vwmacc", "vwmaccsu", "vwmaccus", "vqmaccu",
    "vqmacc", "vqmaccsu", "vqmaccus", "vfmacc", "vfnmacc", "vfmsac", "vfnmsac", "vfmadd",
    "vfnmadd", "vfmsub", "vfnmsub", "vfwmacc", "vfwnmacc", "vfwmsac", "vfwnmsac",
];

/// Flags carried from one decoded instruction to the next on the same core.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DecoderState {
    /// Destination label of the instruction, reported one step late.
    pub dest: Option<Value>,
    pub sources: usize,
    pub has_address: bool,
    pub masked: bool,
    pub setvec: bool,
    pub overwrites: bool,
}

/// Derived events of the instruction root, resolved by position.
#[derive(Debug, Copy, Clone)]
pub struct InstructionSlots {
    pub dest: EventIdx,
    pub sources: [EventIdx; 3],
    pub immediate: EventIdx,
    pub vector_setup: [EventIdx; 3],
    pub opcode: EventIdx,
    pub address_register: EventIdx,
    pub address_offset: EventIdx,
    pub mask: EventIdx,
    pub overwritten: EventIdx,
    pub pc: EventIdx,
    pub vlen: EventIdx,
    pub elen: EventIdx,
    pub offsets: EventIdx,
}

impl InstructionSlots {
    pub fn new(catalog: &Catalog, root: EventIdx) -> Self {
        let slot = |n| catalog.slot(root, n);
        InstructionSlots {
            dest: slot(0),
            sources: [slot(1), slot(2), slot(3)],
            immediate: slot(4),
            vector_setup: [slot(5), slot(6), slot(7)],
            opcode: slot(8),
            address_register: slot(9),
            address_offset: slot(10),
            mask: slot(11),
            overwritten: slot(12),
            pc: slot(13),
            vlen: slot(14),
            elen: slot(15),
            offsets: slot(16),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Operand<'a> {
    Register(&'a str),
    Immediate(Value),
    Memory { offset: Value, base: &'a str },
    Mask(&'a str),
    Other(&'a str),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Directive {
    Trace { event: EventID, value: Value },
    Config { vlen: Value, elen: Value },
}

fn register(input: &str) -> IResult<&str, &str> {
    recognize(pair(satisfy(|c| c.is_ascii_lowercase()), alphanumeric0))(input)
}

fn mask(input: &str) -> IResult<&str, &str> {
    terminated(recognize(pair(char('v'), digit1)), tag(".t"))(input)
}

fn memory(input: &str) -> IResult<&str, Operand<'_>> {
    let (input, offset) = opt(int_literal)(input)?;
    let (input, base) = delimited(char('('), delimited(space0, register, space0), char(')'))(input)?;
    Ok((
        input,
        Operand::Memory {
            offset: offset.unwrap_or(0),
            base,
        },
    ))
}

fn operand(input: &str) -> IResult<&str, Operand<'_>> {
    alt((
        map(mask, Operand::Mask),
        memory,
        map(int_literal, Operand::Immediate),
        map(register, Operand::Register),
    ))(input)
}

impl<'a> Operand<'a> {
    fn parse(token: &'a str) -> Self {
        match all_consuming(operand)(token) {
            Ok((_, op)) => op,
            Err(_) => Operand::Other(token),
        }
    }

    fn register(&self) -> Option<&'a str> {
        match self {
            Operand::Register(reg) => Some(*reg),
            Operand::Memory { base, .. } => Some(*base),
            _ => None,
        }
    }
}

fn trace_directive(input: &str) -> IResult<&str, Directive> {
    let (input, _) = tag(".trace")(input)?;
    let (input, _) = space1(input)?;
    let (input, event) = int_literal(input)?;
    let (input, _) = delimited(space0, char(','), space0)(input)?;
    let (input, value) = int_literal(input)?;
    let (input, _) = space0(input)?;
    Ok((
        input,
        Directive::Trace {
            event: EventID(event as u64),
            value,
        },
    ))
}

fn config_directive(input: &str) -> IResult<&str, Directive> {
    let (input, _) = tag(".config")(input)?;
    let (input, _) = space1(input)?;
    let (input, _) = tag("VLEN=")(input)?;
    let (input, vlen) = int_literal(input)?;
    let (input, _) = delimited(space0, char(','), space0)(input)?;
    let (input, _) = tag("ELEN=")(input)?;
    let (input, elen) = int_literal(input)?;
    let (input, _) = space0(input)?;
    Ok((input, Directive::Config { vlen, elen }))
}

pub fn parse_directive(text: &str) -> Result<Directive> {
    let (_, directive) = all_consuming(alt((trace_directive, config_directive)))(text.trim())?;
    if let Directive::Trace { event, .. } = directive {
        if event.0 as Value <= 0 {
            return Err(Error::Parse(format!("invalid user event id in {:?}", text)));
        }
    }
    Ok(directive)
}

/// Opcode label: the first token without its type suffix. Compressed
/// instructions keep their `c.` prefix.
pub fn mnemonic(text: &str) -> &str {
    let Some(token) = text.split_whitespace().next() else {
        return "";
    };
    let (prefix, body) = match token.strip_prefix("c.") {
        Some(body) => (2, body),
        None => (0, token),
    };
    match body.find('.') {
        Some(dot) => &token[..prefix + dot],
        None => token,
    }
}

/// Mnemonic with element-width digits removed (`vle32ff` -> `vle`).
pub fn family(mnemonic: &str) -> &str {
    let base = mnemonic.trim_end_matches(|c: char| c.is_ascii_digit());
    match base.strip_suffix("ff") {
        Some(stripped) => stripped.trim_end_matches(|c: char| c.is_ascii_digit()),
        None => base,
    }
}

fn operands(text: &str) -> Vec<&str> {
    let text = text.trim();
    let rest = match text.find(char::is_whitespace) {
        Some(pos) => &text[pos..],
        None => "",
    };
    rest.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect()
}

fn decode_instruction(
    text: &str,
    slots: &InstructionSlots,
    catalog: &mut Catalog,
    record: &mut CanonicalRecord,
) -> DecoderState {
    let opcode = mnemonic(text);
    let family = family(opcode);
    let opcode_id = catalog.register_value(slots.opcode, opcode);
    record.push(catalog.id(slots.opcode), opcode_id);

    let tokens = operands(text);
    let parsed: Vec<_> = tokens.iter().map(|t| Operand::parse(t)).collect();
    let mut current = DecoderState::default();

    if SETVEC.contains(&family) {
        for (event, token) in slots.vector_setup.iter().zip(tokens.iter().skip(1)) {
            let value = catalog.register_value(*event, token);
            record.push(catalog.id(*event), value);
        }
        current.setvec = true;
    }

    if WITH_ADDR.contains(&family) {
        let address = parsed.iter().find_map(|op| match op {
            Operand::Memory { offset, base } => Some((*offset, *base)),
            _ => None,
        });
        if let Some((offset, base)) = address {
            let reg = catalog.register_value(slots.address_register, base);
            record.push(catalog.id(slots.address_register), reg);
            let offset = catalog.event(slots.address_offset).scale(offset);
            record.push(catalog.id(slots.address_offset), offset);
            current.has_address = true;
        }
    }

    let registers: Vec<&str> = parsed.iter().filter_map(Operand::register).collect();
    let has_dest = !NO_DEST.contains(&family)
        && matches!(parsed.first(), Some(Operand::Register(_)));
    let sources: &[&str] = if current.setvec {
        &[]
    } else if has_dest {
        &registers[1..]
    } else {
        &registers
    };
    let dest = if has_dest { Some(registers[0]) } else { None };
    if let Some(reg) = dest {
        current.dest = Some(catalog.register_value(slots.dest, reg));
    }
    for (event, reg) in slots.sources.iter().zip(sources) {
        let value = catalog.register_value(*event, reg);
        record.push(catalog.id(*event), value);
        current.sources += 1;
    }

    if OVERWRITE_SRC.contains(&family) {
        let value = dest.map_or(0, |reg| catalog.register_value(slots.overwritten, reg));
        record.push(catalog.id(slots.overwritten), value);
        current.overwrites = true;
    }

    if let Some(reg) = parsed.iter().find_map(|op| match op {
        Operand::Mask(reg) => Some(*reg),
        _ => None,
    }) {
        let value = catalog.register_value(slots.mask, reg);
        record.push(catalog.id(slots.mask), value);
        current.masked = true;
    }

    if let Some(imm) = parsed.iter().find_map(|op| match op {
        Operand::Immediate(imm) => Some(*imm),
        _ => None,
    }) {
        record.push(
            catalog.id(slots.immediate),
            catalog.event(slots.immediate).scale(imm),
        );
    }

    if parsed.iter().any(|op| matches!(op, Operand::Other(_))) {
        debug!("unrecognized operands in {:?}", text);
    }
    current
}

fn decode_directive(
    text: &str,
    slots: &InstructionSlots,
    catalog: &Catalog,
    record: &mut CanonicalRecord,
) {
    match parse_directive(text) {
        Ok(Directive::Trace { event, value }) => {
            record.push(catalog.id(slots.opcode), 0);
            record.push(event, value);
        }
        Ok(Directive::Config { vlen, elen }) => {
            record.push(catalog.id(slots.vlen), catalog.event(slots.vlen).scale(vlen));
            record.push(catalog.id(slots.elen), catalog.event(slots.elen).scale(elen));
        }
        Err(err) => warn!("ignoring malformed directive {:?}: {}", text, err),
    }
}

/// Decodes one disassembly line into `record` and returns the state to
/// carry into the next instruction of the same core.
pub fn decode(
    previous: DecoderState,
    text: &str,
    slots: &InstructionSlots,
    catalog: &mut Catalog,
    record: &mut CanonicalRecord,
) -> DecoderState {
    let text = text.trim();
    let current = if text.starts_with('.') {
        decode_directive(text, slots, catalog, record);
        DecoderState::default()
    } else {
        decode_instruction(text, slots, catalog, record)
    };

    if previous.setvec && !current.setvec {
        for event in &slots.vector_setup {
            record.push(catalog.id(*event), 0);
        }
    }
    if previous.has_address && !current.has_address {
        record.push(catalog.id(slots.address_register), 0);
        record.push(catalog.id(slots.address_offset), 0);
    }
    if previous.masked && !current.masked {
        record.push(catalog.id(slots.mask), 0);
    }
    if current.sources < previous.sources {
        for event in &slots.sources[current.sources..previous.sources] {
            record.push(catalog.id(*event), 0);
        }
    }
    if previous.overwrites && !current.overwrites {
        record.push(catalog.id(slots.overwritten), 0);
    }

    record.push(catalog.id(slots.dest), previous.dest.unwrap_or(0));
    current
}
