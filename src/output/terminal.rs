// Colored terminal output for scores, matches and nearby people.
//
// This module handles all terminal-specific formatting. The main.rs
// command handlers delegate here.

use colored::Colorize;

use crate::classify::ClassifiedVisit;
use crate::db::models::{
    CompatibilityWeights, ConnectionRequest, MatchRecord, MatchStatus, VisitRecord,
};
use crate::db::parse_timestamp;
use crate::matching::matcher::{CoPresenceAction, CoPresenceOutcome, ConnectionOutcome};
use crate::matching::presence::NearbyCandidate;
use crate::scoring::compatibility::CompatibilityBreakdown;

/// Display how a visit was classified.
pub fn display_visit(visit: &ClassifiedVisit) {
    let place = match &visit.place_name {
        Some(name) => format!("{} ({})", visit.place_type, super::truncate_chars(name, 48)),
        None => visit.place_type.to_string(),
    };
    println!(
        "Recorded {} at {:.5}, {:.5}",
        visit.bucket().key().bold(),
        visit.latitude,
        visit.longitude
    );
    println!("  Place: {}", place);
    println!("  When:  {}", visit.timestamp.format("%a %Y-%m-%d %H:%M %:z"));
}

/// Display raw visit history, newest first.
pub fn display_recent_visits(visits: &[VisitRecord]) {
    if visits.is_empty() {
        return;
    }
    println!("{}", format!("Recent visits ({})", visits.len()).bold());
    for v in visits {
        let when = parse_timestamp(&v.visited_at)
            .map(|ts| ts.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|_| v.visited_at.clone());
        let bucket = format!("{}_{}_{}", v.place_type, v.time_of_day, v.day_type);
        println!(
            "  {}  {:<36} {}",
            when.dimmed(),
            bucket,
            v.place_name
                .as_deref()
                .map(|n| super::truncate_chars(n, 40))
                .unwrap_or_default()
        );
    }
    println!();
}

/// Display connection requests waiting on an answer.
pub fn display_pending_requests(requests: &[ConnectionRequest]) {
    if requests.is_empty() {
        println!("No pending requests.");
        return;
    }
    println!(
        "\n{}",
        format!("=== Pending requests ({}) ===", requests.len()).bold()
    );
    for r in requests {
        println!("  {:<32} {}", r.sender_id.bold(), r.created_at.dimmed());
    }
    println!(
        "\n  Answer with: kindred connect <user_id>, or kindred decline <user_id>"
    );
}

/// Display a compatibility score with its ingredients.
pub fn display_compatibility(b: &CompatibilityBreakdown) {
    println!(
        "\n{}",
        format!("=== {} x {} ===", b.user_a, b.user_b).bold()
    );
    println!("  Score: {}", colorize_score(b.score));
    println!();
    println!(
        "  {:<10} {:>6}  {:>7}",
        "Term".dimmed(),
        "Value".dimmed(),
        "Weight".dimmed()
    );
    println!("  {:<10} {:>6.3}  {:>7.3}", "interest", b.interest, b.weights.interest_weight);
    println!("  {:<10} {:>6.3}  {:>7.3}", "behavior", b.behavior, b.weights.behavior_weight);
    println!("  {:<10} {:>6.3}  {:>7.3}", "feedback", b.feedback, b.weights.feedback_weight);

    if !b.shared_interests.is_empty() {
        println!("\n  Shared interests: {}", b.shared_interests.join(", "));
    }
}

/// Display a weight vector after it learned from feedback.
pub fn display_weights(user_id: &str, w: &CompatibilityWeights) {
    println!(
        "Weights for {} after {} data points: interest {:.3}, behavior {:.3}, feedback {:.3}",
        user_id.bold(),
        w.data_points_count,
        w.interest_weight,
        w.behavior_weight,
        w.feedback_weight
    );
}

/// Display people within the search radius.
pub fn display_nearby(candidates: &[NearbyCandidate]) {
    if candidates.is_empty() {
        println!("Nobody nearby right now.");
        return;
    }
    println!(
        "\n{}",
        format!("=== Nearby ({} people) ===", candidates.len()).bold()
    );
    for c in candidates {
        println!(
            "  {:<32} {:>7.0} m  (seen {})",
            c.user_id,
            c.distance_m,
            c.updated_at.format("%H:%M:%S").to_string().dimmed()
        );
    }
    println!();
}

/// Display what co-presence detection decided for each nearby person.
pub fn display_co_presence(outcomes: &[CoPresenceOutcome]) {
    if outcomes.is_empty() {
        println!("Nobody nearby right now.");
        return;
    }
    println!(
        "\n{}",
        format!("=== Co-presence ({} people) ===", outcomes.len()).bold()
    );
    for o in outcomes {
        let action = match o.action {
            CoPresenceAction::Created => "matched".green().bold(),
            CoPresenceAction::Refreshed => "seen together again".green(),
            CoPresenceAction::AwaitingConsent => "awaiting consent".yellow(),
            CoPresenceAction::BelowThreshold => "below threshold".dimmed(),
            CoPresenceAction::Ended => "ended".dimmed(),
        };
        println!(
            "  {:<32} {:>7.0} m  score {}  {}",
            o.user_id,
            o.distance_m,
            colorize_score(o.score),
            action
        );
    }
    println!();
}

/// Display the result of a connection request.
pub fn display_connection(outcome: &ConnectionOutcome, viewer: &str) {
    match outcome {
        ConnectionOutcome::Pending { request } => {
            println!(
                "Request to {} sent, waiting for them to accept.",
                request.receiver_id.bold()
            );
        }
        ConnectionOutcome::Connected { record } => {
            println!("{}", format!("Connected with {}!", record.other(viewer)).green().bold());
            display_match_detail(record);
        }
    }
}

fn display_match_detail(m: &MatchRecord) {
    if let Some(emoji) = &m.shared_emoji_code {
        println!("  Shared code: {}", emoji);
    }
    if let Some(code) = &m.meet_code {
        println!("  Meet code:   {}", code.bold());
    }
    if !m.shared_interests.is_empty() {
        println!(
            "  Interests:   {}",
            super::truncate_chars(&m.shared_interests.join(", "), 80)
        );
    }
    if let (Some(lat), Some(lng)) = (m.venue_lat, m.venue_lng) {
        println!("  Venue:       {:.5}, {:.5}", lat, lng);
    }
}

/// Display every match a user takes part in.
pub fn display_match_list(matches: &[MatchRecord], viewer: &str) {
    if matches.is_empty() {
        println!("No matches yet.");
        return;
    }
    println!(
        "\n{}",
        format!("=== Matches ({}) ===", matches.len()).bold()
    );
    println!(
        "  {:>5}  {:<32} {:<10}  {:<6}  {}",
        "Id".dimmed(),
        "With".dimmed(),
        "Status".dimmed(),
        "Code".dimmed(),
        "Last seen together".dimmed()
    );
    for m in matches {
        println!(
            "  {:>5}  {:<32} {:<10}  {:<6}  {}",
            m.id,
            m.other(viewer),
            colorize_status(m.status),
            m.meet_code.as_deref().unwrap_or("-"),
            m.last_seen_together_at.as_deref().unwrap_or("never")
        );
    }
    println!();
}

/// Colorize a match status.
fn colorize_status(status: MatchStatus) -> colored::ColoredString {
    let s = status.as_str();
    match status {
        MatchStatus::Connected => s.green(),
        MatchStatus::Pending => s.yellow(),
        MatchStatus::Declined => s.dimmed(),
        MatchStatus::Blocked => s.red(),
    }
}

/// Colorize a compatibility score.
fn colorize_score(score: f64) -> colored::ColoredString {
    let s = format!("{score:.2}");
    if score >= 0.7 {
        s.bright_green().bold()
    } else if score >= 0.5 {
        s.green()
    } else if score >= 0.3 {
        s.yellow()
    } else {
        s.dimmed()
    }
}
