//! Renders the attribution engine's final `Contract`/`Source` state into the
//! human-readable report described in spec §6 "Report": per touched contract —
//! name, address, defining files, synthetic gas, total gas — then per non-skipped
//! source a file header and a line-by-line gas listing.

use std::io::{self, Write};

use solgas_contracts::ContractRegistry;
use solgas_sources::SourceRegistry;
use solgas_types::bundle::CompilerBundle;

/// Writes the full report to `out`. Contract and source iteration order
/// follows registry insertion order (first-touched, first-printed).
pub fn render_report(
    contracts: &ContractRegistry,
    sources: &SourceRegistry,
    bundle: &CompilerBundle,
    out: &mut impl Write,
) -> io::Result<()> {
    for contract in contracts.contracts() {
        let name = contract.name.as_deref().unwrap_or("<unresolved>");
        let mut files: Vec<&str> = contract
            .sources_by_id
            .iter()
            .filter_map(|id| bundle.file_name_for_id(*id))
            .collect();
        files.sort_unstable();
        files.dedup();

        writeln!(out, "Contract {name} ({})", contract.address_hex)?;
        writeln!(out, "  files: {}", if files.is_empty() { "<none>".to_string() } else { files.join(", ") })?;
        writeln!(out, "  synthetic gas: {}", contract.synth_gas_cost)?;
        writeln!(out, "  total gas: {}", contract.total_gas_cost)?;
        writeln!(out)?;
    }

    let mut printed_call_marker = false;
    for source in sources.sources() {
        if source.skip || source.text.is_none() {
            continue;
        }
        writeln!(out, "{}", source.file_name)?;
        for line in 0..source.line_count() {
            let gas = source.line_gas.get(&line).copied().unwrap_or(0);
            let marker = if source.lines_with_calls.contains(&line) {
                printed_call_marker = true;
                "+"
            } else {
                " "
            };
            let text = source.line_text(line).unwrap_or("");
            writeln!(out, "{gas:>8} {marker} {line:>4} | {text}")?;
        }
        writeln!(out)?;
    }

    if printed_call_marker {
        writeln!(out, "+ marks a line that issued an outgoing call; its gas includes the full subtree cost.")?;
    }
    Ok(())
}
