use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;

use super::{GameStatus, LiveDataProvider, LiveGame, UpstreamError};

const GAMES_PER_LEAGUE: usize = 2;

/// In-process scoreboard that advances a little on every read.
///
/// Stands in for the real scores service in demos and local development.
pub struct SimulatedLiveDataProvider {
    leagues: Vec<String>,
    games: Mutex<Vec<SimulatedGame>>,
}

struct SimulatedGame {
    game: LiveGame,
    /// Steps taken since the game started; drives period progression
    steps: u32,
}

fn sport_for(league: &str) -> &'static str {
    match league {
        "mlb" => "baseball",
        "nfl" | "ncaa_football" => "football",
        "nba" => "basketball",
        _ => "other",
    }
}

fn teams_for(league: &str) -> &'static [&'static str] {
    match league {
        "mlb" => &["St. Louis Cardinals", "Chicago Cubs", "Milwaukee Brewers", "Cincinnati Reds"],
        "nfl" => &["Tennessee Titans", "Kansas City Chiefs", "Dallas Cowboys", "Houston Texans"],
        "nba" => &["Memphis Grizzlies", "San Antonio Spurs", "Dallas Mavericks", "Houston Rockets"],
        "ncaa_football" => &["Texas Longhorns", "Alabama Crimson Tide", "LSU Tigers", "Georgia Bulldogs"],
        _ => &["Home Club", "Away Club", "North Club", "South Club"],
    }
}

fn periods_for(sport: &str) -> u32 {
    match sport {
        "baseball" => 9,
        _ => 4,
    }
}

fn period_label(sport: &str, period: u32) -> String {
    match sport {
        "baseball" => format!("Inning {}", period),
        _ => format!("Q{}", period),
    }
}

impl SimulatedLiveDataProvider {
    pub fn new(leagues: Vec<String>) -> Self {
        let now = Utc::now();
        let mut games = Vec::new();

        for league in &leagues {
            let teams = teams_for(league);
            for n in 0..GAMES_PER_LEAGUE {
                let sport = sport_for(league);
                games.push(SimulatedGame {
                    game: LiveGame {
                        id: format!("{}-{}", league, n + 1),
                        league: league.clone(),
                        sport: sport.to_string(),
                        home_team: teams[(n * 2) % teams.len()].to_string(),
                        away_team: teams[(n * 2 + 1) % teams.len()].to_string(),
                        home_score: 0,
                        away_score: 0,
                        status: GameStatus::Scheduled,
                        period: None,
                        clock: None,
                        updated_at: now,
                    },
                    steps: 0,
                });
            }
        }

        Self {
            leagues,
            games: Mutex::new(games),
        }
    }

    /// Move every game one step forward and return a snapshot
    fn advance(&self) -> Vec<LiveGame> {
        let mut rng = rand::rng();
        let now = Utc::now();
        let mut games = self.games.lock();

        for sim in games.iter_mut() {
            let game = &mut sim.game;
            match game.status {
                GameStatus::Scheduled => {
                    if rng.random_bool(0.5) {
                        game.status = GameStatus::InProgress;
                        game.period = Some(period_label(&game.sport, 1));
                        game.updated_at = now;
                    }
                }
                GameStatus::InProgress => {
                    sim.steps += 1;
                    let max_points = if game.sport == "baseball" { 2 } else { 7 };
                    if rng.random_bool(0.3) {
                        game.home_score += rng.random_range(1..=max_points);
                    }
                    if rng.random_bool(0.3) {
                        game.away_score += rng.random_range(1..=max_points);
                    }

                    let periods = periods_for(&game.sport);
                    let period = sim.steps / 3 + 1;
                    if period > periods {
                        game.status = GameStatus::Final;
                        game.clock = None;
                    } else {
                        game.period = Some(period_label(&game.sport, period));
                        if game.sport != "baseball" {
                            game.clock = Some(format!("{}:{:02}", rng.random_range(0..15), rng.random_range(0..60)));
                        }
                    }
                    game.updated_at = now;
                }
                GameStatus::Final => {}
            }
        }

        games.iter().map(|g| g.game.clone()).collect()
    }
}

#[async_trait]
impl LiveDataProvider for SimulatedLiveDataProvider {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn get_live_data(&self, league: &str) -> Result<Vec<LiveGame>, UpstreamError> {
        if !self.leagues.iter().any(|l| l == league) {
            return Err(UpstreamError::UnknownLeague(league.to_string()));
        }

        Ok(self
            .advance()
            .into_iter()
            .filter(|g| g.league == league)
            .collect())
    }

    async fn get_all_live_data(&self) -> Result<Vec<LiveGame>, UpstreamError> {
        Ok(self.advance())
    }
}
