//! Command-line front end over [`blockfs::Volume`]: one subcommand per
//! entry of the CLI surface, plus an interactive `shell` that keeps one
//! mounted volume alive across commands (§4.9, §6).

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::error;

use blockfs::{BlockDevice, FdMode, FileBlockDevice, MountState, Volume, VolumeParams};

#[derive(Parser)]
#[command(name = "blockfs", about = "A small block-based filesystem container")]
struct Cli {
    /// Path to the container file. Falls back to `MKFS_IMAGE` if unset.
    #[arg(short = 'i', long, env = "MKFS_IMAGE")]
    image: PathBuf,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Format the container.
    Mkfs {
        #[arg(long, default_value_t = 4096)]
        block_size: usize,
        #[arg(long, default_value_t = 4096)]
        block_count: u32,
        #[arg(long, default_value_t = 1024)]
        inode_count: u32,
        #[arg(long, default_value_t = 128)]
        max_fd: usize,
    },
    Mkdir { path: String },
    Rmdir { path: String },
    Ls { path: Option<String> },
    Cd { path: String },
    Pwd,
    Stat { path: String },
    Creat { path: String },
    Cat { path: String },
    Import { host: PathBuf, guest: String },
    Export { guest: String, host: PathBuf },
    Tree,
    /// Interactive REPL holding one mounted volume for its whole lifetime.
    Shell,
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.verbosity.log_level_filter())
        .init();

    if let Err(e) = run(cli) {
        error!("{e}");
        eprintln!("{e} ({})", e.errno_name());
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> blockfs::Result<()> {
    if let Command::Mkfs {
        block_size,
        block_count,
        inode_count,
        max_fd,
    } = cli.command
    {
        let params = VolumeParams {
            block_size,
            block_count,
            inode_count,
            max_fd,
        };
        let mut device = FileBlockDevice::create(&cli.image, block_size, block_count)?;
        Volume::mkfs(&mut device, &params)?;
        println!("mkfs: formatted {}", cli.image.display());
        return Ok(());
    }

    let device = FileBlockDevice::open(&cli.image, 4096)?;
    let mut volume = Volume::new(Box::new(device), 128);
    volume.mount()?;
    if volume.state() != MountState::Good {
        return Err(blockfs::Error::NotMounted);
    }

    match cli.command {
        Command::Mkfs { .. } => unreachable!("handled above"),
        Command::Shell => shell(&mut volume)?,
        other => {
            let output = dispatch(&mut volume, other)?;
            if !output.is_empty() {
                println!("{output}");
            }
        }
    }

    volume.umount()
}

/// Runs a single parsed command against an already-mounted volume,
/// returning whatever text it should print to stdout.
fn dispatch(volume: &mut Volume, command: Command) -> blockfs::Result<String> {
    match command {
        Command::Mkfs { .. } | Command::Shell => unreachable!(),
        Command::Mkdir { path } => {
            volume.mkdir(&path)?;
            Ok(String::new())
        }
        Command::Rmdir { path } => {
            volume.rmdir(&path)?;
            Ok(String::new())
        }
        Command::Ls { path } => volume.ls(path.as_deref().unwrap_or("")),
        Command::Cd { path } => {
            volume.cd(&path)?;
            Ok(String::new())
        }
        Command::Pwd => Ok(volume.pwd()),
        Command::Stat { path } => {
            let (mut dir, name) = volume.resolve_parent(&path)?;
            let result = volume.stat(&dir, &name);
            dir.close();
            result.map(|iptr| iptr.to_string())
        }
        Command::Creat { path } => {
            volume.creat_path(&path)?;
            Ok(String::new())
        }
        Command::Cat { path } => {
            let data = volume.cat(&path)?;
            Ok(String::from_utf8_lossy(&data).into_owned())
        }
        Command::Import { host, guest } => {
            volume.import(&host, &guest)?;
            Ok(String::new())
        }
        Command::Export { guest, host } => {
            volume.export(&guest, &host)?;
            Ok(String::new())
        }
        Command::Tree => volume.tree(),
    }
}

/// Whitespace-tokenized interactive loop over stdin, `exit`/EOF terminated.
/// Adds raw fd primitives (`open`/`read`/`write`/`seek`/`close`) that only
/// make sense with one volume held open across commands.
fn shell(volume: &mut Volume) -> blockfs::Result<()> {
    let stdin = io::stdin();
    print!("blockfs> ");
    io::stdout().flush().ok();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            [] => {}
            ["exit"] => break,
            ["mkdir", path] => report_unit(volume.mkdir(path)),
            ["rmdir", path] => report_unit(volume.rmdir(path)),
            ["ls"] => report(volume.ls("")),
            ["ls", path] => report(volume.ls(path)),
            ["cd", path] => report_unit(volume.cd(path)),
            ["pwd"] => println!("{}", volume.pwd()),
            ["creat", path] => report_unit(volume.creat_path(path)),
            ["cat", path] => report(volume.cat(path).map(|b| String::from_utf8_lossy(&b).into_owned())),
            ["tree"] => report(volume.tree()),
            ["open", path, mode] => {
                let mode = if *mode == "write" { FdMode::Write } else { FdMode::Read };
                report(volume.open_path(path, mode));
            }
            ["write", fd, data @ ..] => {
                let fd: i32 = fd.parse().unwrap_or(-1);
                report(volume.write(fd, data.join(" ").as_bytes()));
            }
            ["read", fd, n] => {
                let fd: i32 = fd.parse().unwrap_or(-1);
                let n: usize = n.parse().unwrap_or(0);
                let mut buf = vec![0u8; n];
                match volume.read(fd, &mut buf) {
                    Ok(k) => println!("{}", String::from_utf8_lossy(&buf[..k])),
                    Err(e) => eprintln!("{e}"),
                }
            }
            ["seek", fd, offset] => {
                let fd: i32 = fd.parse().unwrap_or(-1);
                let offset: u32 = offset.parse().unwrap_or(0);
                report_unit(volume.seek(fd, offset));
            }
            ["close", fd] => {
                let fd: i32 = fd.parse().unwrap_or(-1);
                report_unit(volume.close(fd));
            }
            _ => eprintln!("unrecognized command: {line}"),
        }
        print!("blockfs> ");
        io::stdout().flush().ok();
    }
    println!();
    Ok(())
}

fn report<T: std::fmt::Display>(result: blockfs::Result<T>) {
    match result {
        Ok(v) => {
            let text = v.to_string();
            if !text.is_empty() {
                println!("{text}");
            }
        }
        Err(e) => eprintln!("{e} ({})", e.errno_name()),
    }
}

fn report_unit(result: blockfs::Result<()>) {
    if let Err(e) = result {
        eprintln!("{e} ({})", e.errno_name());
    }
}
