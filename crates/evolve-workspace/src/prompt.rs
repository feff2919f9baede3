//! Default system prompt text per workspace mode.

use evolve_core::WorkspaceMode;

const KNOWLEDGE_PREAMBLE: &str = "\
You are working inside a prepared sandbox workspace.
Place any files you want the caller to retrieve under `output/`.
Read-only inputs the caller uploaded are under `context/`.
Any scripts the caller uploaded are under `scripts/`.
Use `temp/` for scratch work; its contents are not retrieved.";

const SWE_PREAMBLE: &str = "\
You are working inside a prepared sandbox workspace for a software
engineering task. The repository under test is checked out at `repo/`.
Place any files you want the caller to retrieve under `output/`.
Read-only inputs the caller uploaded are under `context/`.
Use `temp/` for scratch work; its contents are not retrieved.";

/// Render the system prompt for `mode`, combined with a caller-supplied
/// prompt.
///
/// In `Knowledge` mode the caller's prompt is appended after the workspace
/// preamble; in `Swe` mode it replaces the preamble beyond the directory
/// contract itself (the directory contract is still stated first).
pub fn render(mode: WorkspaceMode, caller_prompt: Option<&str>) -> String {
    match mode {
        WorkspaceMode::Knowledge => match caller_prompt {
            Some(extra) => format!("{KNOWLEDGE_PREAMBLE}\n\n{extra}"),
            None => KNOWLEDGE_PREAMBLE.to_string(),
        },
        WorkspaceMode::Swe => {
            let directory_contract = "\
You are working inside a prepared sandbox workspace for a software
engineering task. The repository under test is checked out at `repo/`.
Place any files you want the caller to retrieve under `output/`.";
            match caller_prompt {
                Some(extra) => format!("{directory_contract}\n\n{extra}"),
                None => SWE_PREAMBLE.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knowledge_mode_appends_caller_prompt_after_preamble() {
        let rendered = render(WorkspaceMode::Knowledge, Some("Summarize the attached PDF."));
        assert!(rendered.starts_with(KNOWLEDGE_PREAMBLE));
        assert!(rendered.ends_with("Summarize the attached PDF."));
    }

    #[test]
    fn swe_mode_replaces_preamble_beyond_directory_contract() {
        let rendered = render(WorkspaceMode::Swe, Some("Fix the failing test."));
        assert!(rendered.contains("repo/"));
        assert!(rendered.ends_with("Fix the failing test."));
    }
}
