use anyhow::{bail, Result};

const TARGET_FLAG: &str = "-target";
const REPLACE_FLAG: &str = "-replace";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Run options carried by comment trailing arguments.
pub struct RunArguments {
    pub target_addrs: Vec<String>,
    pub replace_addrs: Vec<String>,
}

/// Maps `-target=ADDR` and `-replace=ADDR` (or the two-token forms) onto run
/// options. Any other argument rejects the whole list so no run is created
/// with options the user did not get.
pub fn parse_run_arguments(args: &[String]) -> Result<RunArguments> {
    let mut parsed = RunArguments::default();
    let mut unsupported = Vec::new();
    let mut tokens = args.iter();
    while let Some(token) = tokens.next() {
        let normalized = token.strip_prefix('-').filter(|rest| rest.starts_with('-'));
        let flag_text = normalized.unwrap_or(token);
        let (flag, inline) = match flag_text.split_once('=') {
            Some((flag, value)) => (flag, Some(value.to_string())),
            None => (flag_text, None),
        };
        let bucket = match flag {
            TARGET_FLAG => &mut parsed.target_addrs,
            REPLACE_FLAG => &mut parsed.replace_addrs,
            _ => {
                unsupported.push(token.clone());
                continue;
            }
        };
        let value = match inline {
            Some(value) => Some(value),
            None => tokens.next().cloned(),
        };
        match value.filter(|value| !value.trim().is_empty()) {
            Some(value) => bucket.push(value),
            None => bail!("run argument '{flag}' requires a resource address"),
        }
    }
    if !unsupported.is_empty() {
        bail!("unsupported run arguments: {}", unsupported.join(" "));
    }
    Ok(parsed)
}
