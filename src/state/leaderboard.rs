use crate::{
    dao::models::PlayerEntity,
    dto::{format_system_time, session::LeaderboardEntry},
};

/// Rank players by score, breaking ties by earliest join.
///
/// Positions are 1-based and equal scores share a position (`1, 1, 3`).
pub fn rank(players: &[PlayerEntity]) -> Vec<LeaderboardEntry> {
    let mut ordered: Vec<&PlayerEntity> = players.iter().collect();
    ordered.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.joined_at.cmp(&b.joined_at))
    });

    let mut entries = Vec::with_capacity(ordered.len());
    let mut previous: Option<(u64, usize)> = None;
    for (offset, player) in ordered.into_iter().enumerate() {
        let position = match previous {
            Some((score, position)) if score == player.score => position,
            _ => offset + 1,
        };
        previous = Some((player.score, position));
        entries.push(LeaderboardEntry {
            position,
            player_id: player.id,
            display_name: player.display_name.clone(),
            score: player.score,
            completed_at: player.completed_at.map(format_system_time),
        });
    }
    entries
}
