//! Pluggie inter-MCU command set.
//!
//! Every exchange between the ESP8266 master and the ATtiny85 slave starts
//! with a single opcode byte. Each command has exactly one acknowledgment,
//! which the slave replies with once the command has been executed.

use core::convert::TryFrom;
use core::fmt;
use core::num::ParseIntError;
use core::str::FromStr;

/// No operation.
pub const NOP: u8 = 0x00;
/// No-ack, returned by the slave for commands it does not recognise.
pub const UNKNOWNC: u8 = 0xFF;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodeError {
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("0x{0:02X} is not a command with an acknowledgment")]
    NoSuchCommand(u8),

    #[error("0x{0:02X} is not a registered opcode")]
    UnknownByte(u8),

    #[error("unknown command family '{0}'")]
    UnknownFamily(String),
}

/// Inconsistencies detected while building a [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum TableError {
    #[error("opcode 0x{0:02X} is registered more than once")]
    Collision(u8),

    #[error("opcode 0x{0:02X} has no paired opcode")]
    Unpaired(u8),

    #[error("opcode 0x{opcode:02X} pairs with 0x{partner:02X}, which does not pair back")]
    Asymmetric { opcode: u8, partner: u8 },

    #[error("sentinel 0x{0:02X} must not have a paired opcode")]
    SentinelPaired(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// Direct pin and ADC manipulation
    Hardware,
    /// Reset, initialisation, status and calibration
    General,
    /// Buffer transfers and Timonel bootloader control
    Transfer,
    /// Reserved values without a partner
    Sentinel,
}

impl Family {
    pub const ALL: [Family; 4] = [
        Family::Hardware,
        Family::General,
        Family::Transfer,
        Family::Sentinel,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Family::Hardware => "hardware",
            Family::General => "general",
            Family::Transfer => "transfer",
            Family::Sentinel => "sentinel",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for Family {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Family::ALL
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CodeError::UnknownFamily(s.to_string()))
    }
}

/// Direction of an opcode on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Sent by the master
    Command,
    /// Replied by the slave
    Acknowledgment,
    Sentinel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Set ATtiny85 PB1 = 1
    SetPb1High = 0xE9,
    AckPb1High = 0x16,
    /// Set ATtiny85 PB1 = 0
    SetPb1Low = 0xE1,
    AckPb1Low = 0x1E,
    /// Set ATtiny85 PB3 = PWMx
    SetPb3Pwm = 0xFB,
    AckPb3Pwm = 0x04,
    /// Read ATtiny85 ADC2
    ReadAdc2 = 0xDA,
    AckReadAdc2 = 0x25,

    Nop = NOP,
    Unknown = UNKNOWNC,

    /// Reset ATtiny85
    ResetTiny = 0x80,
    AckResetTiny = 0x7F,
    /// Initialise ATtiny85
    InitTiny = 0x81,
    AckInitTiny = 0x7E,
    /// Read generic info
    GetInfo = 0x82,
    AckGetInfo = 0x7D,
    /// Release analog data on hold
    ReleaseData = 0x83,
    AckReleaseData = 0x7C,
    /// Fix positive half-cycles for ADC Vrms calculations
    FixPositive = 0x84,
    AckFixPositive = 0x7B,
    /// Fix negative half-cycles for ADC Vrms calculations
    FixNegative = 0x85,
    AckFixNegative = 0x7A,

    /// Read buffer data
    ReadBuffer = 0xA1,
    AckReadBuffer = 0x5E,
    /// Write data to buffer
    WriteBuffer = 0xA2,
    AckWriteBuffer = 0x5D,
    /// Get Timonel bootloader version
    GetTimonelVersion = 0xA3,
    AckTimonelVersion = 0x5C,
    /// Delete application flash
    DeleteFlash = 0xA4,
    AckDeleteFlash = 0x5B,
    /// Set flash page address
    SetPageAddress = 0xA5,
    AckPageAddress = 0x5A,
    /// Exit Timonel and run the application
    ExitTimonel = 0xA6,
    AckExitTimonel = 0x59,
}

impl Opcode {
    /// Wire byte for this opcode
    pub const fn byte(self) -> u8 {
        self as u8
    }

    /// Mnemonic used by the firmware sources for this opcode
    pub const fn mnemonic(self) -> &'static str {
        use Opcode::*;

        match self {
            SetPb1High => "STDPB1_1",
            AckPb1High => "AKDPB1_1",
            SetPb1Low => "STDPB1_0",
            AckPb1Low => "AKDPB1_0",
            SetPb3Pwm => "STANAPB3",
            AckPb3Pwm => "ACKANPB3",
            ReadAdc2 => "READADC2",
            AckReadAdc2 => "ACKNADC2",
            Nop => "NOP",
            Unknown => "UNKNOWNC",
            ResetTiny => "RESETINY",
            AckResetTiny => "ACKRESTY",
            InitTiny => "INITTINY",
            AckInitTiny => "ACKINITY",
            GetInfo => "GET_INFO",
            AckGetInfo => "ACK_GETI",
            ReleaseData => "REL_ANDT",
            AckReleaseData => "ACK_RELD",
            FixPositive => "FIXPOSIT",
            AckFixPositive => "ACKFXPOS",
            FixNegative => "FIXNEGAT",
            AckFixNegative => "ACKFXNEG",
            ReadBuffer => "READBUFF",
            AckReadBuffer => "ACKRDBUF",
            WriteBuffer => "WRITBUFF",
            AckWriteBuffer => "ACKWTBUF",
            GetTimonelVersion => "GETTMNLV",
            AckTimonelVersion => "ACKTMNLV",
            DeleteFlash => "DELFLASH",
            AckDeleteFlash => "ACKDELFL",
            SetPageAddress => "STPGADDR",
            AckPageAddress => "AKPGADDR",
            ExitTimonel => "EXITTMNL",
            AckExitTimonel => "ACKEXITT",
        }
    }

    pub fn entry(self) -> &'static Entry {
        // Every variant is present in the shipped table
        match REGISTRY.entry(self as u8) {
            Some(e) => e,
            None => unreachable!("opcode missing from command table"),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.mnemonic())
    }
}

impl TryFrom<u8> for Opcode {
    type Error = CodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        REGISTRY
            .entry(byte)
            .map(|e| e.opcode)
            .ok_or(CodeError::UnknownByte(byte))
    }
}

impl FromStr for Opcode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        REGISTRY
            .entries()
            .iter()
            .find(|e| e.opcode.mnemonic() == s)
            .map(|e| e.opcode)
            .ok_or_else(|| CodeError::UnknownOperation(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry {
    pub opcode: Opcode,
    pub family: Family,
    pub kind: Kind,
    /// Acknowledgment for a command, command for an acknowledgment
    pub pair: Option<Opcode>,
    pub description: &'static str,
}

impl Entry {
    const fn command(opcode: Opcode, ack: Opcode, family: Family, description: &'static str) -> Self {
        Self{ opcode, family, kind: Kind::Command, pair: Some(ack), description }
    }

    const fn ack(opcode: Opcode, command: Opcode, family: Family, description: &'static str) -> Self {
        Self{ opcode, family, kind: Kind::Acknowledgment, pair: Some(command), description }
    }

    const fn sentinel(opcode: Opcode, description: &'static str) -> Self {
        Self{ opcode, family: Family::Sentinel, kind: Kind::Sentinel, pair: None, description }
    }
}

/// The Pluggie command set, including the Timonel bootloader extension.
pub const ENTRIES: &[Entry] = {
    use Family::*;
    use Opcode::*;

    &[
        Entry::command(SetPb1High, AckPb1High, Hardware, "Set ATtiny85 PB1 = 1"),
        Entry::ack(AckPb1High, SetPb1High, Hardware, "Acknowledge PB1 = 1"),
        Entry::command(SetPb1Low, AckPb1Low, Hardware, "Set ATtiny85 PB1 = 0"),
        Entry::ack(AckPb1Low, SetPb1Low, Hardware, "Acknowledge PB1 = 0"),
        Entry::command(SetPb3Pwm, AckPb3Pwm, Hardware, "Set ATtiny85 PB3 = PWMx"),
        Entry::ack(AckPb3Pwm, SetPb3Pwm, Hardware, "Acknowledge PB3 = PWMx"),
        Entry::command(ReadAdc2, AckReadAdc2, Hardware, "Read ATtiny85 ADC2"),
        Entry::ack(AckReadAdc2, ReadAdc2, Hardware, "Acknowledge read ADC2"),

        Entry::sentinel(Nop, "No operation"),
        Entry::sentinel(Unknown, "No-ack / unknown command"),

        Entry::command(ResetTiny, AckResetTiny, General, "Reset ATtiny85"),
        Entry::ack(AckResetTiny, ResetTiny, General, "Acknowledge reset"),
        Entry::command(InitTiny, AckInitTiny, General, "Initialise ATtiny85"),
        Entry::ack(AckInitTiny, InitTiny, General, "Acknowledge initialise"),
        Entry::command(GetInfo, AckGetInfo, General, "Read generic info"),
        Entry::ack(AckGetInfo, GetInfo, General, "Acknowledge read info"),
        Entry::command(ReleaseData, AckReleaseData, General, "Release analog data on hold"),
        Entry::ack(AckReleaseData, ReleaseData, General, "Acknowledge release data"),
        Entry::command(FixPositive, AckFixPositive, General, "Fix positive half-cycles for ADC Vrms"),
        Entry::ack(AckFixPositive, FixPositive, General, "Acknowledge fix positive"),
        Entry::command(FixNegative, AckFixNegative, General, "Fix negative half-cycles for ADC Vrms"),
        Entry::ack(AckFixNegative, FixNegative, General, "Acknowledge fix negative"),

        Entry::command(ReadBuffer, AckReadBuffer, Transfer, "Read buffer data"),
        Entry::ack(AckReadBuffer, ReadBuffer, Transfer, "Acknowledge read data"),
        Entry::command(WriteBuffer, AckWriteBuffer, Transfer, "Write data to buffer"),
        Entry::ack(AckWriteBuffer, WriteBuffer, Transfer, "Acknowledge write data"),
        Entry::command(GetTimonelVersion, AckTimonelVersion, Transfer, "Get Timonel version"),
        Entry::ack(AckTimonelVersion, GetTimonelVersion, Transfer, "Acknowledge Timonel version"),
        Entry::command(DeleteFlash, AckDeleteFlash, Transfer, "Delete application flash"),
        Entry::ack(AckDeleteFlash, DeleteFlash, Transfer, "Acknowledge delete flash"),
        Entry::command(SetPageAddress, AckPageAddress, Transfer, "Set flash page address"),
        Entry::ack(AckPageAddress, SetPageAddress, Transfer, "Acknowledge page address"),
        Entry::command(ExitTimonel, AckExitTimonel, Transfer, "Exit Timonel, run application"),
        Entry::ack(AckExitTimonel, ExitTimonel, Transfer, "Acknowledge exit Timonel"),
    ]
};

/// Validated, byte-indexed view over a command table.
#[derive(Debug, Clone)]
pub struct Registry {
    entries: &'static [Entry],
    index: [Option<u8>; 256],
}

/// Process-wide registry over [`ENTRIES`]. An inconsistent table fails the build.
pub static REGISTRY: Registry = match Registry::new(ENTRIES) {
    Ok(registry) => registry,
    Err(_) => panic!("inconsistent pluggie command table"),
};

impl Registry {
    /// Build a registry, checking that bytes are unique and pairs are symmetric
    pub const fn new(entries: &'static [Entry]) -> Result<Self, TableError> {
        let mut index: [Option<u8>; 256] = [None; 256];

        let mut i = 0;
        while i < entries.len() {
            let byte = entries[i].opcode as u8;
            if index[byte as usize].is_some() {
                return Err(TableError::Collision(byte));
            }
            index[byte as usize] = Some(i as u8);
            i += 1;
        }

        let mut i = 0;
        while i < entries.len() {
            let entry = &entries[i];
            let byte = entry.opcode as u8;

            match (entry.kind, entry.pair) {
                (Kind::Sentinel, Some(_)) => return Err(TableError::SentinelPaired(byte)),
                (Kind::Sentinel, None) => (),
                (_, None) => return Err(TableError::Unpaired(byte)),
                (kind, Some(partner)) => {
                    let partner = partner as u8;
                    let asymmetric = TableError::Asymmetric { opcode: byte, partner };

                    let other = match index[partner as usize] {
                        Some(j) => &entries[j as usize],
                        None => return Err(asymmetric),
                    };
                    let names_back = match other.pair {
                        Some(p) => p as u8 == byte,
                        None => false,
                    };
                    let opposite = match (kind, other.kind) {
                        (Kind::Command, Kind::Acknowledgment) => true,
                        (Kind::Acknowledgment, Kind::Command) => true,
                        _ => false,
                    };
                    if !names_back || !opposite {
                        return Err(asymmetric);
                    }
                }
            }

            i += 1;
        }

        Ok(Self { entries, index })
    }

    pub fn entries(&self) -> &'static [Entry] {
        self.entries
    }

    pub fn entry(&self, byte: u8) -> Option<&'static Entry> {
        let entries = self.entries;
        self.index[byte as usize].map(|i| &entries[i as usize])
    }

    /// Entries belonging to a family, in table order
    pub fn family(&self, family: Family) -> impl Iterator<Item = &'static Entry> {
        self.entries.iter().filter(move |e| e.family == family)
    }

    /// Wire byte for a mnemonic such as `RESETINY`
    pub fn code_for(&self, name: &str) -> Result<u8, CodeError> {
        self.entries
            .iter()
            .find(|e| e.opcode.mnemonic() == name)
            .map(|e| e.opcode as u8)
            .ok_or_else(|| CodeError::UnknownOperation(name.to_string()))
    }

    /// Opcode for a byte seen on the bus, [`Opcode::Unknown`] if unregistered
    pub fn operation_for(&self, byte: u8) -> Opcode {
        self.entry(byte).map(|e| e.opcode).unwrap_or(Opcode::Unknown)
    }

    pub fn is_command(&self, byte: u8) -> bool {
        matches!(self.entry(byte), Some(e) if e.kind == Kind::Command)
    }

    pub fn is_acknowledgment(&self, byte: u8) -> bool {
        matches!(self.entry(byte), Some(e) if e.kind == Kind::Acknowledgment)
    }

    /// Acknowledgment the slave must reply with for `command`
    pub fn expected_ack(&self, command: u8) -> Result<u8, CodeError> {
        match self.entry(command) {
            Some(Entry { kind: Kind::Command, pair: Some(ack), .. }) => Ok(*ack as u8),
            _ => Err(CodeError::NoSuchCommand(command)),
        }
    }

    /// Slave-side reply for a received byte: its acknowledgment, or `UNKNOWNC`
    pub fn reply_for(&self, byte: u8) -> u8 {
        self.expected_ack(byte).unwrap_or(UNKNOWNC)
    }
}

/// Parse a byte written as `0xA6`, `A6h` or `166`
pub fn parse_byte(s: &str) -> Result<u8, ParseIntError> {
    let s = s.trim();

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else if let Some(hex) = s.strip_suffix('h').or_else(|| s.strip_suffix('H')) {
        u8::from_str_radix(hex, 16)
    } else {
        s.parse()
    }
}
