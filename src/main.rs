#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use anyhow::{anyhow, Context};

use pluggie_i2c::protocol::{parse_byte, Entry, Family, Opcode, REGISTRY};
use pluggie_i2c::{Master, Options};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    #[structopt(subcommand)]
    command: Command,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Clone, Debug, StructOpt)]
pub enum Command {
    /// List the command table
    List {
        /// Only show one family (hardware, general, transfer, sentinel)
        #[structopt(long)]
        family: Option<Family>,
    },

    /// Look up an opcode by byte value or mnemonic
    Lookup {
        /// Byte (0xA6, A6h, 166) or mnemonic (EXITTMNL)
        value: String,
    },

    /// Send a command to a device and check its acknowledgment
    Send {
        /// Command mnemonic
        command: String,

        /// I2C bus device
        #[structopt(long, default_value = "/dev/i2c-1")]
        bus: String,

        /// Argument bytes as hex
        #[structopt(long, default_value = "")]
        args: String,

        /// Number of bytes to read after the acknowledgment
        #[structopt(long, default_value = "0")]
        reply_len: usize,

        #[structopt(flatten)]
        options: Options,
    },
}

fn main() -> anyhow::Result<()> {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    match o.command {
        Command::List{ family } => {
            let entries = REGISTRY.entries().iter().filter(|e| family.map_or(true, |f| e.family == f));
            for e in entries {
                print_entry(e);
            }
        },
        Command::Lookup{ value } => {
            let opcode = match parse_byte(&value) {
                Ok(b) if REGISTRY.entry(b).is_none() => {
                    println!("0x{:02X} is not registered", b);
                    REGISTRY.operation_for(b)
                },
                Ok(b) => REGISTRY.operation_for(b),
                Err(_) => value.to_uppercase().parse::<Opcode>()?,
            };
            print_entry(opcode.entry());
        },
        Command::Send{ command, bus, args, reply_len, options } => {
            let command = command.to_uppercase().parse::<Opcode>()?;
            let args = hex::decode(&args).context("invalid argument bytes")?;

            info!("Connecting to {}", bus);

            let mut m = Master::linux(&bus, options)
                .map_err(|e| anyhow!("Error opening i2c bus: {:?}", e))?;

            let mut reply = vec![0u8; reply_len];
            m.exchange(command, &args, &mut reply)?;

            info!("{} acknowledged", command);
            if !reply.is_empty() {
                println!("{}", hex::encode(&reply));
            }
        },
    }

    Ok(())
}

fn print_entry(e: &Entry) {
    let pair = match e.pair {
        Some(p) => format!("{} (0x{:02X})", p, p.byte()),
        None => "-".to_string(),
    };
    println!("0x{:02X}  {:<8}  {:<8}  {:<14}  {:<17}  {}",
        e.opcode.byte(), e.opcode, e.family, format!("{:?}", e.kind), pair, e.description);
}
