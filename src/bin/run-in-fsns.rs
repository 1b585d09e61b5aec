use std::path::PathBuf;
use std::{env, process};

use log;

use fsns::args::{Options, Parsed};
use fsns::tempdir::TempDir;
use fsns::{logging, runc};
use fsns::{DryRun, Effects, Live, Result, Sandbox};

fn usage() {
    let execname = env::args_os()
        .next()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "run-in-fsns".to_string());
    eprint!("Usage: {execname} [options] [--] [<cmd> [args ...]]

Run a command in a new, private, root directory assembled from bind mounts.
Needs no privileges beyond unprivileged user namespaces.

Options:
    -h --help                     - Show this message
    --bind SRC,TARGET[,ro|rw]     - Make SRC visible at TARGET.  Default read-only.
    --bind-top SRC,TARGET[,ro|rw] - Bind each entry of directory SRC under TARGET
    --bind-temp TARGET            - Bind a new empty writable directory at TARGET
    --exclude SRC                 - Drop any --bind-top entry with source SRC
    --run-in DIR                  - Start in DIR.  Default $HOME, or /
    --dry-run                     - Only print what would be done

Each of --bind, --bind-top, --bind-temp, and --exclude accepts a ':'
separated list.  Without any of these the whole host is visible read-only,
with an empty writable $HOME.  The default command is /bin/sh.

eg. see only /etc
  $ run-in-fsns --bind /etc,/etc,ro -- /usr/bin/cat /etc/hostname

");
}

fn run(opts: &Options) -> Result<i32> {
    let binds = opts.bind_list()?;
    let root = TempDir::new()?;

    let effects: Box<dyn Effects> = if opts.dry_run {
        Box::new(DryRun::stdout())
    } else {
        Box::new(Live)
    };

    let sandbox = Sandbox::new(
        effects.as_ref(),
        root.path(),
        &binds,
        opts.workdir(),
        opts.command.clone(),
    )?;
    log::debug!("New root {}", sandbox.root().display());

    let ret = runc(&sandbox);
    drop(sandbox);

    // avoid EBUSY
    if let Err(err) = env::set_current_dir("/") {
        log::warn!("chdir / : {}", err);
    }
    drop(root);
    drop(binds);
    ret
}

fn main() {
    if let Err(err) = logging::setup() {
        eprintln!("Unable to setup logging: {}", err);
    }

    let home = env::var_os("HOME").map(PathBuf::from);
    let opts = match Options::parse(env::args_os().skip(1), home) {
        Ok(Parsed::Run(opts)) => opts,
        Ok(Parsed::Help) => {
            usage();
            process::exit(0);
        }
        Err(err) => {
            eprintln!("Error: {}", err);
            eprintln!();
            usage();
            process::exit(1);
        }
    };

    match run(&opts) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {}", err);
            process::exit(1);
        }
    }
}
