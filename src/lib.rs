//! Pluggie I2C command set.
//!
//! Master side of the ESP8266 -> ATtiny85 command protocol, including the
//! Timonel bootloader commands.

use core::fmt::Debug;
use core::marker::PhantomData;

#[macro_use]
extern crate log;

extern crate embedded_hal;
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::i2c::{Read, Write};

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod protocol;
use protocol::{CodeError, Opcode, REGISTRY, UNKNOWNC};

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<I2cError: Debug> {
    #[error("i2c error: {0:?}")]
    I2c(I2cError),

    #[error(transparent)]
    Code(#[from] CodeError),

    /// The slave replied `UNKNOWNC`
    #[error("device did not recognise command 0x{0:02X}")]
    Unrecognized(u8),

    #[error("expected acknowledgment 0x{expected:02X}, received 0x{received:02X}")]
    UnexpectedAck { expected: u8, received: u8 },
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// I2C address of the slave device
    #[cfg_attr(feature = "structopt", structopt(long, default_value="0x0A", parse(try_from_str=protocol::parse_byte)))]
    pub address: u8,

    /// Time to wait between sending a command and reading the acknowledgment
    #[cfg_attr(feature = "structopt", structopt(long, default_value="10"))]
    pub reply_delay_ms: u32,

    /// Number of times a failed exchange is repeated
    #[cfg_attr(feature = "structopt", structopt(long, default_value="0"))]
    pub retries: u32,

    /// Period to wait before repeating a failed exchange
    #[cfg_attr(feature = "structopt", structopt(long, default_value="5"))]
    pub retry_delay_ms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            address: 0x0A,
            reply_delay_ms: 10,
            retries: 0,
            retry_delay_ms: 5,
        }
    }
}

pub struct Master<I, D, E> {
    options: Options,
    bus: I,
    delay: D,
    _err: PhantomData<E>,
}

impl <I, D, E> Master<I, D, E>
where
    I: Write<Error=E> + Read<Error=E>,
    D: DelayMs<u32>,
    E: Debug,
{
    /// Create a new master instance
    pub fn new(bus: I, delay: D, options: Options) -> Self {
        Self{options, bus, delay, _err: PhantomData}
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Release the underlying bus and delay
    pub fn free(self) -> (I, D) {
        (self.bus, self.delay)
    }

    /// Send a command with its arguments and check the acknowledgment.
    ///
    /// `reply` is filled with the bytes following the acknowledgment.
    pub fn exchange(&mut self, command: Opcode, args: &[u8], reply: &mut [u8])
    -> Result<(), Error<E>> {
        let ack = REGISTRY.expected_ack(command.byte())?;

        let mut attempt = 0;
        loop {
            match self.attempt(command, ack, args, reply) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.options.retries => {
                    warn!("{} failed ({}), retrying", command, e);
                    attempt += 1;
                    self.delay.delay_ms(self.options.retry_delay_ms);
                },
                Err(e) => {
                    error!("{} failed after {} attempt(s): {}", command, attempt + 1, e);
                    return Err(e)
                },
            }
        }
    }

    fn attempt(&mut self, command: Opcode, ack: u8, args: &[u8], reply: &mut [u8])
    -> Result<(), Error<E>> {
        let address = self.options.address;

        let mut frame = Vec::with_capacity(1 + args.len());
        frame.push(command.byte());
        frame.extend_from_slice(args);

        debug!("Sending {} (0x{:02X}) to 0x{:02X}, args: {:02x?}", command, command.byte(), address, args);
        self.bus.write(address, &frame).map_err(Error::I2c)?;

        self.delay.delay_ms(self.options.reply_delay_ms);

        let mut buff = vec![0u8; 1 + reply.len()];
        self.bus.read(address, &mut buff).map_err(Error::I2c)?;

        match buff[0] {
            v if v == ack => {
                debug!("Received {}", REGISTRY.operation_for(v));
                reply.copy_from_slice(&buff[1..]);
                Ok(())
            },
            UNKNOWNC => {
                debug!("Received no-ack for {}", command);
                Err(Error::Unrecognized(command.byte()))
            },
            v => {
                debug!("Received unexpected value: 0x{:02x}", v);
                Err(Error::UnexpectedAck{ expected: ack, received: v })
            },
        }
    }

    /// Reset the ATtiny85
    pub fn reset(&mut self) -> Result<(), Error<E>> {
        self.exchange(Opcode::ResetTiny, &[], &mut [])
    }

    /// Initialise the ATtiny85
    pub fn init(&mut self) -> Result<(), Error<E>> {
        self.exchange(Opcode::InitTiny, &[], &mut [])
    }

    /// Read generic device info into `info`
    pub fn get_info(&mut self, info: &mut [u8]) -> Result<(), Error<E>> {
        self.exchange(Opcode::GetInfo, &[], info)
    }

    /// Release analog data held by the device
    pub fn release_data(&mut self) -> Result<(), Error<E>> {
        self.exchange(Opcode::ReleaseData, &[], &mut [])
    }

    pub fn fix_positive(&mut self) -> Result<(), Error<E>> {
        self.exchange(Opcode::FixPositive, &[], &mut [])
    }

    pub fn fix_negative(&mut self) -> Result<(), Error<E>> {
        self.exchange(Opcode::FixNegative, &[], &mut [])
    }

    /// Drive PB1 high or low
    pub fn set_pb1(&mut self, high: bool) -> Result<(), Error<E>> {
        let command = if high { Opcode::SetPb1High } else { Opcode::SetPb1Low };
        self.exchange(command, &[], &mut [])
    }

    /// Set the PWM duty cycle on PB3
    pub fn set_pb3_pwm(&mut self, duty: u8) -> Result<(), Error<E>> {
        self.exchange(Opcode::SetPb3Pwm, &[duty], &mut [])
    }

    /// Read raw ADC2 bytes into `data`
    pub fn read_adc2(&mut self, data: &mut [u8]) -> Result<(), Error<E>> {
        self.exchange(Opcode::ReadAdc2, &[], data)
    }

    /// Read the Timonel bootloader version into `version`
    pub fn bootloader_version(&mut self, version: &mut [u8]) -> Result<(), Error<E>> {
        self.exchange(Opcode::GetTimonelVersion, &[], version)
    }

    /// Erase the application flash
    pub fn delete_flash(&mut self) -> Result<(), Error<E>> {
        self.exchange(Opcode::DeleteFlash, &[], &mut [])
    }

    /// Set the flash page address for subsequent buffer writes
    pub fn set_page_address(&mut self, address: u16) -> Result<(), Error<E>> {
        self.exchange(Opcode::SetPageAddress, &address.to_be_bytes(), &mut [])
    }

    /// Leave the bootloader and run the application
    pub fn exit_bootloader(&mut self) -> Result<(), Error<E>> {
        self.exchange(Opcode::ExitTimonel, &[], &mut [])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq)]
    struct BusFault;

    /// Records writes and replays queued read responses
    #[derive(Default)]
    struct FakeBus {
        writes: Vec<(u8, Vec<u8>)>,
        reads: VecDeque<Result<Vec<u8>, BusFault>>,
    }

    impl FakeBus {
        fn replying(replies: &[&[u8]]) -> Self {
            Self {
                reads: replies.iter().map(|r| Ok(r.to_vec())).collect(),
                ..Default::default()
            }
        }
    }

    impl Write for FakeBus {
        type Error = BusFault;

        fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusFault> {
            self.writes.push((address, bytes.to_vec()));
            Ok(())
        }
    }

    impl Read for FakeBus {
        type Error = BusFault;

        fn read(&mut self, _address: u8, buffer: &mut [u8]) -> Result<(), BusFault> {
            let data = self.reads.pop_front().unwrap_or_else(|| Ok(vec![UNKNOWNC]))?;
            for (i, b) in buffer.iter_mut().enumerate() {
                *b = data.get(i).copied().unwrap_or(0);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeDelay(u32);

    impl DelayMs<u32> for FakeDelay {
        fn delay_ms(&mut self, ms: u32) {
            self.0 += ms;
        }
    }

    fn master(bus: FakeBus, options: Options) -> Master<FakeBus, FakeDelay, BusFault> {
        Master::new(bus, FakeDelay::default(), options)
    }

    #[test]
    fn reset_is_acknowledged() {
        let mut m = master(FakeBus::replying(&[&[0x7F]]), Options::default());
        m.reset().unwrap();

        let (bus, delay) = m.free();
        assert_eq!(bus.writes, vec![(0x0A, vec![0x80])]);
        assert_eq!(delay.0, 10);
    }

    #[test]
    fn reply_bytes_follow_ack() {
        let mut m = master(FakeBus::replying(&[&[0x5C, 0x01, 0x05]]), Options::default());
        let mut version = [0u8; 2];
        m.bootloader_version(&mut version).unwrap();
        assert_eq!(version, [0x01, 0x05]);
    }

    #[test]
    fn arguments_follow_command() {
        let options = Options{ address: 0x15, ..Default::default() };
        let mut m = master(FakeBus::replying(&[&[0x04], &[0x5A]]), options);
        m.set_pb3_pwm(0x80).unwrap();
        m.set_page_address(0x1C40).unwrap();

        let (bus, _) = m.free();
        assert_eq!(bus.writes, vec![
            (0x15, vec![0xFB, 0x80]),
            (0x15, vec![0xA5, 0x1C, 0x40]),
        ]);
    }

    #[test]
    fn pb1_levels() {
        let mut m = master(FakeBus::replying(&[&[0x16], &[0x1E]]), Options::default());
        m.set_pb1(true).unwrap();
        m.set_pb1(false).unwrap();

        let (bus, _) = m.free();
        assert_eq!(bus.writes[0].1, vec![0xE9]);
        assert_eq!(bus.writes[1].1, vec![0xE1]);
    }

    #[test]
    fn no_ack_is_unrecognized() {
        let mut m = master(FakeBus::replying(&[&[UNKNOWNC]]), Options::default());
        assert_eq!(m.exit_bootloader(), Err(Error::Unrecognized(0xA6)));
    }

    #[test]
    fn wrong_ack_is_reported() {
        let mut m = master(FakeBus::replying(&[&[0x7E]]), Options::default());
        assert_eq!(m.reset(), Err(Error::UnexpectedAck{ expected: 0x7F, received: 0x7E }));
    }

    #[test]
    fn sentinels_and_acks_are_not_sent() {
        let mut m = master(FakeBus::default(), Options::default());
        assert_eq!(
            m.exchange(Opcode::Nop, &[], &mut []),
            Err(Error::Code(CodeError::NoSuchCommand(0x00)))
        );
        assert_eq!(
            m.exchange(Opcode::AckResetTiny, &[], &mut []),
            Err(Error::Code(CodeError::NoSuchCommand(0x7F)))
        );

        let (bus, _) = m.free();
        assert!(bus.writes.is_empty());
    }

    #[test]
    fn bus_errors_propagate() {
        let mut bus = FakeBus::default();
        bus.reads.push_back(Err(BusFault));

        let mut m = master(bus, Options::default());
        assert_eq!(m.delete_flash(), Err(Error::I2c(BusFault)));
    }

    #[test]
    fn retries_until_acknowledged() {
        let mut bus = FakeBus::replying(&[&[UNKNOWNC]]);
        bus.reads.push_front(Err(BusFault));
        bus.reads.push_back(Ok(vec![0x7E]));

        let options = Options{ retries: 2, ..Default::default() };
        let mut m = master(bus, options);
        m.init().unwrap();

        let (bus, delay) = m.free();
        assert_eq!(bus.writes.len(), 3);
        // three reply waits and two retry waits
        assert_eq!(delay.0, 3 * 10 + 2 * 5);
    }

    #[test]
    fn retries_exhausted() {
        let options = Options{ retries: 1, ..Default::default() };
        let mut m = master(FakeBus::replying(&[&[0x00], &[0x00]]), options);
        assert_eq!(m.fix_positive(), Err(Error::UnexpectedAck{ expected: 0x7B, received: 0x00 }));

        let (bus, _) = m.free();
        assert_eq!(bus.writes.len(), 2);
    }
}
