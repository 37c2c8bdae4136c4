//! nxio - pipeline command line tool
//!
//! Assembles filter pipelines over files or stdin/stdout.
//! Usage: nxio <COMMAND> [OPTIONS] [FILE]

use std::io::{Read, Write};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};

use nxio::cipher::{AesFilter, CipherMode, CryptoDir};
use nxio::codec::{Base64Decoder, Base64Encoder, HexDecoder, HexEncoder};
use nxio::device::{Backend, Device, IoStatus};
use nxio::error::DeviceResult;
use nxio::file::FileDevice;
use nxio::hash::{HashAlgorithm, HashFilter};
use nxio::padding::{PadEncoder, Pkcs7Unpad};

/// Stdin as a custom device kind.
struct StdinSource;

impl Backend for StdinSource {
    fn kind(&self) -> &'static str {
        "stdin"
    }

    fn read(&mut self, buf: &mut [u8]) -> DeviceResult<IoStatus> {
        match std::io::stdin().lock().read(buf)? {
            0 => Ok(IoStatus::End),
            n => Ok(IoStatus::Ready(n)),
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return ExitCode::from(1);
    }
    if matches!(args[1].as_str(), "-h" | "--help" | "help") {
        print_usage();
        return ExitCode::SUCCESS;
    }
    if matches!(args[1].as_str(), "-V" | "--version") {
        println!("nxio {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let rest: Vec<&str> = args[2..].iter().map(|s| s.as_str()).collect();
    let result = match args[1].as_str() {
        "hash" => cmd_hash(&rest),
        "hex" | "unhex" | "b64" | "unb64" => cmd_codec(args[1].as_str(), &rest),
        "aes" => cmd_aes(&rest),
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            return ExitCode::from(1);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("nxio: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn print_usage() {
    println!("nxio - composable byte-stream filters");
    println!();
    println!("USAGE:");
    println!("    nxio hash [--algo sha256|sha1|md5] [FILE...]");
    println!("    nxio hex|unhex|b64|unb64 [--lenient] [FILE]");
    println!("    nxio aes --key HEX --encrypt|--decrypt [OPTIONS] [FILE]");
    println!();
    println!("AES OPTIONS:");
    println!("    --mode ecb|cbc|pcbc|cfb|ofb   cipher mode (default cbc)");
    println!("    --iv HEX                      16-byte IV for chained modes");
    println!("    --pkcs7                       pad / unpad around the cipher");
    println!();
    println!("With no FILE, input is read from stdin; output goes to stdout.");
}

fn open_source(path: Option<&str>) -> Result<Device> {
    match path {
        Some(p) => FileDevice::open(p, "r").with_context(|| format!("open {}", p)),
        None => Device::open(StdinSource, "r").context("open stdin"),
    }
}

fn copy_to_stdout(dev: &mut Device) -> Result<()> {
    let mut out = std::io::stdout().lock();
    let mut chunk = [0u8; 4096];
    loop {
        let n = dev.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        out.write_all(&chunk[..n])?;
    }
    out.flush()?;
    Ok(())
}

fn cmd_hash(args: &[&str]) -> Result<()> {
    let mut algo = HashAlgorithm::Sha256;
    let mut files = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i] {
            "--algo" | "-a" => {
                i += 1;
                algo = match args.get(i).copied() {
                    Some("sha256") => HashAlgorithm::Sha256,
                    Some("sha1") => HashAlgorithm::Sha1,
                    Some("md5") => HashAlgorithm::Md5,
                    other => bail!("unknown algorithm: {:?}", other.unwrap_or("")),
                };
            }
            f => files.push(f),
        }
        i += 1;
    }

    let inputs: Vec<Option<&str>> = if files.is_empty() {
        vec![None]
    } else {
        files.into_iter().map(Some).collect()
    };
    for input in inputs {
        let src = open_source(input)?;
        let mut dev = HashFilter::open(src, algo, "r")?;
        let mut digest = Vec::new();
        dev.read_to_end(&mut digest)?;
        println!("{}  {}", hex::encode(&digest), input.unwrap_or("-"));
    }
    Ok(())
}

fn cmd_codec(cmd: &str, args: &[&str]) -> Result<()> {
    let mut lenient = false;
    let mut file = None;
    for a in args {
        match *a {
            "--lenient" => lenient = true,
            f => file = Some(f),
        }
    }
    let src = open_source(file)?;
    let mut dev = match cmd {
        "hex" => HexEncoder::open(src, "r")?,
        "unhex" => HexDecoder::open(src, "r")?,
        "b64" => Base64Encoder::open(src, "r")?,
        "unb64" if lenient => Base64Decoder::open_lenient(src, "r")?,
        "unb64" => Base64Decoder::open(src, "r")?,
        _ => unreachable!(),
    };
    copy_to_stdout(&mut dev)?;
    if cmd == "b64" {
        println!();
    }
    Ok(())
}

fn cmd_aes(args: &[&str]) -> Result<()> {
    let mut mode = CipherMode::Cbc;
    let mut key = None;
    let mut iv = None;
    let mut dir = None;
    let mut pkcs7 = false;
    let mut file = None;

    let mut i = 0;
    while i < args.len() {
        match args[i] {
            "--mode" | "-m" => {
                i += 1;
                mode = match args.get(i).copied() {
                    Some("ecb") => CipherMode::Ecb,
                    Some("cbc") => CipherMode::Cbc,
                    Some("pcbc") => CipherMode::Pcbc,
                    Some("cfb") => CipherMode::Cfb,
                    Some("ofb") => CipherMode::Ofb,
                    Some("ctr") => CipherMode::Ctr,
                    other => bail!("unknown mode: {:?}", other.unwrap_or("")),
                };
            }
            "--key" | "-k" => {
                i += 1;
                let raw = args.get(i).context("--key needs a value")?;
                key = Some(hex::decode(raw).context("key must be hex")?);
            }
            "--iv" => {
                i += 1;
                let raw = args.get(i).context("--iv needs a value")?;
                let bytes = hex::decode(raw).context("iv must be hex")?;
                let arr: [u8; 16] = bytes
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("iv must be 16 bytes"))?;
                iv = Some(arr);
            }
            "--encrypt" | "-e" => dir = Some(CryptoDir::Encrypt),
            "--decrypt" | "-d" => dir = Some(CryptoDir::Decrypt),
            "--pkcs7" => pkcs7 = true,
            f => file = Some(f),
        }
        i += 1;
    }

    let key = key.context("--key is required")?;
    let dir = dir.context("--encrypt or --decrypt is required")?;
    let src = open_source(file)?;

    let mut dev = match dir {
        CryptoDir::Encrypt => {
            let src = if pkcs7 {
                PadEncoder::pkcs7(src, 16, "r")?
            } else {
                src
            };
            AesFilter::open(src, &key, iv, mode, dir, "r")?
        }
        CryptoDir::Decrypt => {
            let plain = AesFilter::open(src, &key, iv, mode, dir, "r")?;
            if pkcs7 {
                Pkcs7Unpad::open(plain, 16, "r")?
            } else {
                plain
            }
        }
    };
    copy_to_stdout(&mut dev)?;
    Ok(())
}
