//! The `format` command: canonicalize a manifest.

use std::io::Read;

use crate::{cli::FormatArgs, Error};

pub fn run(args: FormatArgs) -> Result<(), Error> {
    if args.inplace && args.check_only {
        return Err(Error::InvalidArgs(
            "--inplace and --check-only cannot be combined".to_owned(),
        ));
    }
    let file = args.file.filter(|f| f.as_str() != "-");
    if args.inplace && file.is_none() {
        return Err(Error::InvalidArgs(
            "--inplace requires a filename".to_owned(),
        ));
    }

    let (label, content) = match &file {
        Some(path) => (
            path.to_string(),
            std::fs::read_to_string(path).map_err(|e| Error::io(path.clone(), e))?,
        ),
        None => {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .map_err(|e| Error::io("<stdin>", e))?;
            ("<stdin>".to_owned(), content)
        }
    };

    let mut rules = mellow_manifest::parse(label.clone(), content.clone())?;
    for rule in &mut rules {
        rule.sort_for_format();
    }
    let formatted = mellow_manifest::write(&rules);

    if args.check_only {
        if formatted != content {
            return Err(Error::NotFormatted(label));
        }
        return Ok(());
    }
    match &file {
        Some(path) if args.inplace => {
            std::fs::write(path, formatted).map_err(|e| Error::io(path.clone(), e))?;
        }
        _ => print!("{formatted}"),
    }
    Ok(())
}
