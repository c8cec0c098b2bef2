use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};

use log::error;

use crate::backend::FindError;

pub type KeyValues = BTreeMap<String, String>;

pub fn read(input: impl Read, keys: &[&str]) -> Result<KeyValues, FindError> {
    let mut kv = BTreeMap::new();

    for line in BufReader::new(input).lines() {
        let line = line.map_err(|e| {
            error!("couldn't read line: {e}");
            FindError::Internal
        })?;

        if line.is_empty() {
            continue;
        }

        let (k, v) = line.split_once(':').ok_or_else(|| {
            error!("invalid line, can't split");
            FindError::Internal
        })?;

        let Some(v) = v.strip_prefix(' ') else {
            error!("invalid line - no whitespace after colon");
            return Err(FindError::Internal);
        };
        kv.insert(k.into(), v.into());
    }

    if let Some(missing) = keys.iter().find(|k| !kv.contains_key(**k)) {
        error!("missing key \"{missing}\"");
        return Err(FindError::Internal);
    }

    Ok(kv)
}

pub fn write(mut output: impl Write, keyvalues: &KeyValues) -> Result<(), std::io::Error> {
    for (k, v) in keyvalues {
        if v.contains('\n') {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("newline in value for \"{k}\""),
            ));
        }
        writeln!(output, "{}: {}", k, v)?;
    }
    Ok(())
}
