//! Prometheus text exposition format.
//!
//! Renders the reporter's gauge families and the launch counter into
//! the text format scraped from the daemon's `/metrics` endpoint.

use crate::reporter::FleetReporter;

/// Render every tracked family. Gauge families are one per lifecycle
/// bucket; the launch counter is cumulative.
pub fn render_prometheus(reporter: &FleetReporter) -> String {
    let mut out = String::new();

    for (bucket, samples) in reporter.all_gauge_samples() {
        let family = format!("fleetgrid_{bucket}_machines");
        out.push_str(&format!(
            "# HELP {family} Number of machines currently in the {bucket} lifecycle state.\n"
        ));
        out.push_str(&format!("# TYPE {family} gauge\n"));
        for (instance_type, count) in samples {
            out.push_str(&format!(
                "{family}{{instance_type=\"{instance_type}\"}} {count}\n"
            ));
        }
    }

    out.push_str(
        "# HELP fleetgrid_launched_machines_total Machines launched since startup.\n",
    );
    out.push_str("# TYPE fleetgrid_launched_machines_total counter\n");
    for (instance_type, count) in reporter.launched_samples() {
        out.push_str(&format!(
            "fleetgrid_launched_machines_total{{instance_type=\"{instance_type}\"}} {count}\n"
        ));
    }

    out
}
