//! The command-line driver: read one C source file, compile it, and
//! print the assembly on stdout.

use std::io::{self, BufWriter, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
  let mut args = std::env::args();
  let argv0 = args.next().unwrap_or_else(|| "minicc".into());
  let (Some(path), None) = (args.next(), args.next()) else {
    eprintln!("usage: {argv0} <file>");
    return ExitCode::FAILURE;
  };

  let mut src = match std::fs::read_to_string(&path) {
    Ok(src) => src,
    Err(e) => {
      eprintln!("{argv0}: {path}: {e}");
      return ExitCode::FAILURE;
    }
  };
  if !src.ends_with('\n') {
    src.push('\n');
  }

  let stdout = io::stdout();
  let mut out = BufWriter::new(stdout.lock());
  match minicc::compile(&path, &src, &mut out) {
    Ok(()) => {
      if let Err(e) = out.flush() {
        eprintln!("{argv0}: {e}");
        return ExitCode::FAILURE;
      }
      ExitCode::SUCCESS
    }
    Err(e) => {
      eprintln!("{}", e.render(&path, &src));
      ExitCode::FAILURE
    }
  }
}
