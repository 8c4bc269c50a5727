//! Static query catalog for the star schema.
//!
//! Maps each logical dataset to the `SELECT DISTINCT` transformation that
//! derives it from the staging tables, plus the DDL that creates every
//! table the pipeline touches. Pure data; no behavior beyond lookup.

use std::fmt;

/// A logical dataset in the star schema: the fact table plus the four
/// dimensions derived from staged data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dataset {
    Songplays,
    Users,
    Songs,
    Artists,
    Time,
}

impl Dataset {
    /// All datasets, in load order (fact first, then dimensions).
    pub const ALL: [Dataset; 5] = [
        Dataset::Songplays,
        Dataset::Users,
        Dataset::Songs,
        Dataset::Artists,
        Dataset::Time,
    ];

    /// The four dimension datasets.
    pub const DIMENSIONS: [Dataset; 4] =
        [Dataset::Users, Dataset::Songs, Dataset::Artists, Dataset::Time];

    /// The warehouse table this dataset is loaded into.
    pub fn table(&self) -> &'static str {
        match self {
            Dataset::Songplays => "songplays",
            Dataset::Users => "users",
            Dataset::Songs => "songs",
            Dataset::Artists => "artists",
            Dataset::Time => "time",
        }
    }

    /// The `SELECT DISTINCT` query deriving this dataset from staged tables.
    ///
    /// Deduplication happens here, not via uniqueness constraints on the
    /// target table. The load task wraps this in `INSERT INTO <table>`.
    pub fn select(&self) -> &'static str {
        match self {
            Dataset::Songplays => SONGPLAY_SELECT,
            Dataset::Users => USER_SELECT,
            Dataset::Songs => SONG_SELECT,
            Dataset::Artists => ARTIST_SELECT,
            Dataset::Time => TIME_SELECT,
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Fact table: one row per NextSong event, matched against staged songs
/// by title, artist, and duration. Events without a song match are dropped
/// by the inner join; an empty join result is valid.
const SONGPLAY_SELECT: &str = "\
SELECT DISTINCT
    TIMESTAMP 'epoch' + se.ts / 1000 * INTERVAL '1 second' AS start_time,
    se.userId AS user_id,
    se.level,
    ss.song_id,
    ss.artist_id,
    se.sessionId AS session_id,
    se.location,
    se.userAgent AS user_agent
FROM staging_events se
JOIN staging_songs ss
  ON se.song = ss.title
 AND se.artist = ss.artist_name
 AND se.length = ss.duration
WHERE se.page = 'NextSong'";

const USER_SELECT: &str = "\
SELECT DISTINCT userId, firstName, lastName, gender, level
FROM staging_events
WHERE userId IS NOT NULL";

const SONG_SELECT: &str = "\
SELECT DISTINCT song_id, title, artist_id, year, duration
FROM staging_songs";

const ARTIST_SELECT: &str = "\
SELECT DISTINCT artist_id, artist_name, artist_location, artist_latitude, artist_longitude
FROM staging_songs";

/// The time dimension reads from the fact table, not staging. This is the
/// one dimension with a real data dependency on the fact load.
const TIME_SELECT: &str = "\
SELECT DISTINCT
    start_time,
    EXTRACT(hour FROM start_time),
    EXTRACT(day FROM start_time),
    EXTRACT(week FROM start_time),
    EXTRACT(month FROM start_time),
    EXTRACT(year FROM start_time),
    EXTRACT(weekday FROM start_time)
FROM songplays";

/// DDL for every table the pipeline touches: the two staging landing zones,
/// the fact table, and the four dimensions. Idempotent via IF NOT EXISTS.
pub const CREATE_TABLES: &str = "\
CREATE TABLE IF NOT EXISTS staging_events (
    artist        VARCHAR,
    auth          VARCHAR,
    firstName     VARCHAR,
    gender        VARCHAR(1),
    itemInSession INTEGER,
    lastName      VARCHAR,
    length        DOUBLE PRECISION,
    level         VARCHAR,
    location      VARCHAR,
    method        VARCHAR,
    page          VARCHAR,
    registration  BIGINT,
    sessionId     INTEGER,
    song          VARCHAR,
    status        INTEGER,
    ts            BIGINT,
    userAgent     VARCHAR,
    userId        INTEGER
);

CREATE TABLE IF NOT EXISTS staging_songs (
    num_songs        INTEGER,
    artist_id        VARCHAR,
    artist_name      VARCHAR,
    artist_latitude  DOUBLE PRECISION,
    artist_longitude DOUBLE PRECISION,
    artist_location  VARCHAR,
    song_id          VARCHAR,
    title            VARCHAR,
    duration         DOUBLE PRECISION,
    year             INTEGER
);

CREATE TABLE IF NOT EXISTS songplays (
    songplay_id BIGINT IDENTITY(0,1) PRIMARY KEY,
    start_time  TIMESTAMP NOT NULL,
    user_id     INTEGER,
    level       VARCHAR,
    song_id     VARCHAR,
    artist_id   VARCHAR,
    session_id  INTEGER,
    location    VARCHAR,
    user_agent  VARCHAR
);

CREATE TABLE IF NOT EXISTS users (
    user_id    INTEGER,
    first_name VARCHAR,
    last_name  VARCHAR,
    gender     VARCHAR(1),
    level      VARCHAR
);

CREATE TABLE IF NOT EXISTS songs (
    song_id   VARCHAR,
    title     VARCHAR,
    artist_id VARCHAR,
    year      INTEGER,
    duration  DOUBLE PRECISION
);

CREATE TABLE IF NOT EXISTS artists (
    artist_id VARCHAR,
    name      VARCHAR,
    location  VARCHAR,
    latitude  DOUBLE PRECISION,
    longitude DOUBLE PRECISION
);

CREATE TABLE IF NOT EXISTS time (
    start_time TIMESTAMP NOT NULL,
    hour       INTEGER,
    day        INTEGER,
    week       INTEGER,
    month      INTEGER,
    year       INTEGER,
    weekday    INTEGER
);";
