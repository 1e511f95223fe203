//! Interactive prompts for values missing from the command line.

use dialoguer::Input;
use std::io::IsTerminal;

use matlit_core::MaterialId;

pub fn stdin_is_terminal() -> bool {
    std::io::stdin().is_terminal()
}

/// Ask for a Materials Project ID until one parses.
pub fn material_id() -> anyhow::Result<String> {
    let raw: String = Input::new()
        .with_prompt("Materials Project ID (e.g. mp-20738)")
        .validate_with(|input: &String| -> Result<(), String> {
            MaterialId::parse(input)
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .interact_text()?;
    Ok(raw.trim().to_string())
}

pub fn paper_count(default: usize) -> anyhow::Result<usize> {
    let count: usize = Input::new()
        .with_prompt("How many relevant papers should be collected?")
        .default(default)
        .interact_text()?;
    Ok(count)
}
