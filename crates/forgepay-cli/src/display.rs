//! Vertical card display for projects, milestones, and organizations.

use forgepay_core::{Evidence, Organization};
use forgepay_engine::{CompletionReport, CreatedProject, MilestoneView, ProjectView};

const MAX_LIST_ITEMS: usize = 20;

// ── Public API ──

/// Print a project with its milestones and live escrow state as a card.
pub fn print_project_card(view: &ProjectView) {
    let project = &view.project;
    println!("=== {} ===", project.title);
    if !project.description.is_empty() {
        println!("{}", project.description);
    }
    println!();

    println!("Project");
    row("id", &project.id);
    row("status", project.status.as_str());
    row("total_amount", &project.total_amount.to_string());
    row("expected_delivery", &project.expected_delivery_date.to_string());
    row("contractor", &project.contractor_id);
    row("freelancer", &project.freelancer_id);
    row("contract_id", project.contract_id.as_deref().unwrap_or("-"));
    row("progress", &format!("{}%", view.progress()));
    if let Some(current) = view.current_milestone() {
        row("current_milestone", &current.milestone.title);
    }
    println!();

    match &view.escrow {
        Some(escrow) => {
            println!("Escrow");
            if let Some(balance) = escrow.balance {
                row("balance", &balance.to_string());
            }
            if let Some(fee) = escrow.platform_fee {
                row("platform_fee", &format!("{fee}%"));
            }
            if let Some(roles) = &escrow.roles {
                row("approver", roles.approver.as_str());
                row("service_provider", roles.service_provider.as_str());
                row("platform_address", roles.platform_address.as_str());
            }
            println!();
        }
        None => {
            println!("Escrow");
            row("state", "unavailable (local data only)");
            println!();
        }
    }

    println!("Milestones ({}):", view.milestones.len());
    for (i, m) in view.milestones.iter().take(MAX_LIST_ITEMS).enumerate() {
        print_milestone_line(i, m);
    }
    if view.milestones.len() > MAX_LIST_ITEMS {
        println!("    ... and {} more", view.milestones.len() - MAX_LIST_ITEMS);
    }
    println!();
}

pub fn print_created(created: &CreatedProject) {
    println!("=== {} ===", created.project.title);
    row("project_id", &created.project.id);
    row("engagement_id", &created.project.engagement_id);
    row("contract_id", created.project.contract_id.as_deref().unwrap_or("-"));
    for m in &created.milestones {
        println!(
            "  {:<26} {}% = {}  [{}]",
            m.title,
            m.percentage,
            m.amount(created.project.total_amount),
            m.id
        );
    }
}

pub fn print_completion(report: &CompletionReport) {
    println!("=== {} ===", report.milestone.title);
    row("status", report.milestone.status.as_str());
    row("outcome", &format!("{:?}", report.outcome));
    if let Some(index) = report.contract_index {
        row("contract_index", &index.to_string());
    }
    if let Some(method) = report.mapping {
        row("index_match", &format!("{method:?}"));
    }
    row("progress", &format!("{}%", report.progress));
    row(
        "project_completed",
        if report.project_completed { "yes" } else { "no" },
    );
}

pub fn print_organizations(orgs: &[Organization]) {
    if orgs.is_empty() {
        println!("(no organizations)");
        return;
    }
    for org in orgs {
        println!(
            "  {:<38} {:<10} {:<30} {}",
            org.id,
            org.org_type.as_str(),
            org.legal_name,
            org.wallet_address.as_ref().map_or("-", |w| w.as_str())
        );
    }
}

pub fn print_evidences(evidences: &[Evidence]) {
    for e in evidences {
        println!(
            "  {:<38} {} {}",
            e.id,
            e.file_url,
            e.description.as_deref().unwrap_or("")
        );
    }
}

// ── Rows ──

fn row(label: &str, value: &str) {
    println!("  {:<26} {}", label, value);
}

fn print_milestone_line(i: usize, m: &MilestoneView) {
    let contract = match (m.contract_approved, m.contract_status.as_deref()) {
        (Some(approved), status) => format!(
            "contract: {}{}",
            if approved { "approved" } else { "not approved" },
            status.map(|s| format!(", {s}")).unwrap_or_default()
        ),
        (None, _) => "contract: -".to_string(),
    };
    println!(
        "  {:>2}. {:<30} {:>3}% {:>14}  {:<12} {}",
        i + 1,
        m.milestone.title,
        m.milestone.percentage,
        m.amount.to_string(),
        m.milestone.status.as_str(),
        contract
    );
}
