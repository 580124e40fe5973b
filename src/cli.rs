use crate::config::GPIO_INPUT;
use crate::{Error, Result};

/// Options for a normal run; values are `None` when not provided on CLI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOptions {
    pub input: Option<String>,
    pub serial: Option<String>,
    pub config: Option<String>,
    /// `-a` was given explicitly.
    pub auto_detect: bool,
    pub power_save: bool,
    pub verbose: bool,
    pub log_file: Option<String>,
}

impl RunOptions {
    /// Auto-detection stays on unless a device was named (or `gpio` chosen) without `-a`.
    pub fn wants_auto_detect(&self) -> bool {
        if self.auto_detect {
            return self.input.as_deref() != Some(GPIO_INPUT);
        }
        self.input.is_none() && self.serial.is_none()
    }
}

/// Parsed command-line intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(RunOptions),
    ShowHelp,
    ShowVersion,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut opts = RunOptions::default();
        let mut iter = args.iter();

        while let Some(flag) = iter.next() {
            match flag.as_str() {
                "-h" | "--help" => return Ok(Command::ShowHelp),
                "--version" => return Ok(Command::ShowVersion),
                "-i" | "--input" => opts.input = Some(take_value(flag, &mut iter)?),
                "-s" | "--serial" => opts.serial = Some(take_value(flag, &mut iter)?),
                "-c" | "--config" => opts.config = Some(take_value(flag, &mut iter)?),
                "-a" | "--auto-detect" => opts.auto_detect = true,
                "-p" | "--power-save" => opts.power_save = true,
                "-v" | "--verbose" => opts.verbose = true,
                "--log-file" => opts.log_file = Some(take_value(flag, &mut iter)?),
                other => {
                    return Err(Error::InvalidArgs(format!(
                        "unknown flag '{other}', try --help"
                    )));
                }
            }
        }

        Ok(Command::Run(opts))
    }

    pub fn help() -> &'static str {
        concat!(
            "micropanel - OLED menu controller for rotary-encoder panels\n",
            "\n",
            "USAGE:\n",
            "  micropanel [-i <path|gpio>] [-s <path>] [-c <config.json>] [-a] [-p] [-v]\n",
            "  micropanel --help\n",
            "  micropanel --version\n",
            "\n",
            "OPTIONS:\n",
            "  -i <path|gpio>     Input event device, or 'gpio' for GPIO keys (default: /dev/input/event0)\n",
            "  -s <path>          Display serial port or /dev/i2c-N (default: /dev/ttyACM0)\n",
            "  -c <config.json>   Module configuration file\n",
            "  -a                 Auto-detect the USB panel (default unless -i or -s is given)\n",
            "  -p                 Blank the display after 10 s without input\n",
            "  -v                 Verbose logging\n",
            "  --log-file <path>  Also append log lines to this file\n",
            "  -h, --help         Show this help\n",
            "  --version          Show version\n",
        )
    }

    pub fn print_help() {
        println!("{}", Self::help());
    }
}

fn take_value(flag: &str, iter: &mut std::slice::Iter<String>) -> Result<String> {
    iter.next()
        .cloned()
        .ok_or_else(|| Error::InvalidArgs(format!("expected a value after {flag}")))
}
