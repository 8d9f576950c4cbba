pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS movies (
        id INTEGER PRIMARY KEY,
        tmdb_id INTEGER UNIQUE NOT NULL,
        title TEXT NOT NULL,
        release_date TEXT,
        runtime INTEGER,
        last_activity TEXT,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS submissions (
        id INTEGER PRIMARY KEY,
        movie_id INTEGER NOT NULL,
        version_title TEXT NOT NULL,
        end_credits_at TEXT,
        moving_credits_at TEXT,
        notes TEXT,
        source TEXT NOT NULL,
        username TEXT,
        submitter_ip TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT,
        FOREIGN KEY(movie_id) REFERENCES movies(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_submissions_movie ON submissions(movie_id);
    CREATE INDEX IF NOT EXISTS idx_submissions_ip ON submissions(submitter_ip);

    CREATE TABLE IF NOT EXISTS post_credit_scenes (
        id INTEGER PRIMARY KEY,
        submission_id INTEGER NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT,
        description TEXT,
        scene_order INTEGER NOT NULL,
        FOREIGN KEY(submission_id) REFERENCES submissions(id) ON DELETE CASCADE,
        UNIQUE(submission_id, scene_order)
    );

    CREATE TABLE IF NOT EXISTS comments (
        id INTEGER PRIMARY KEY,
        movie_id INTEGER NOT NULL,
        username TEXT NOT NULL,
        body TEXT NOT NULL,
        submitter_ip TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(movie_id) REFERENCES movies(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_comments_movie ON comments(movie_id);
    CREATE INDEX IF NOT EXISTS idx_comments_ip ON comments(submitter_ip);

    CREATE TABLE IF NOT EXISTS likes (
        id INTEGER PRIMARY KEY,
        submission_id INTEGER NOT NULL,
        submitter_ip TEXT NOT NULL,
        vote_type TEXT NOT NULL CHECK (vote_type IN ('like', 'dislike')),
        created_at TEXT NOT NULL,
        FOREIGN KEY(submission_id) REFERENCES submissions(id) ON DELETE CASCADE,
        UNIQUE(submission_id, submitter_ip)
    );

    CREATE INDEX IF NOT EXISTS idx_likes_ip ON likes(submitter_ip);

    CREATE TABLE IF NOT EXISTS comment_likes (
        id INTEGER PRIMARY KEY,
        comment_id INTEGER NOT NULL,
        submitter_ip TEXT NOT NULL,
        vote_type TEXT NOT NULL CHECK (vote_type IN ('like', 'dislike')),
        created_at TEXT NOT NULL,
        FOREIGN KEY(comment_id) REFERENCES comments(id) ON DELETE CASCADE,
        UNIQUE(comment_id, submitter_ip)
    );

    CREATE INDEX IF NOT EXISTS idx_comment_likes_ip ON comment_likes(submitter_ip);

    -- (report_type, entity_id) is a soft reference: no foreign key, no cascade.
    CREATE TABLE IF NOT EXISTS reports (
        id INTEGER PRIMARY KEY,
        report_type TEXT NOT NULL CHECK (report_type IN ('submission', 'comment')),
        entity_id INTEGER NOT NULL,
        reason TEXT NOT NULL,
        email TEXT,
        submitter_ip TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_reports_entity ON reports(report_type, entity_id);

    CREATE TABLE IF NOT EXISTS ip_bans (
        id INTEGER PRIMARY KEY,
        ip_address TEXT UNIQUE NOT NULL,
        reason TEXT NOT NULL,
        banned_by TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    -- Thresholds already escalated per submission, for lifetime dedupe.
    CREATE TABLE IF NOT EXISTS escalations (
        submission_id INTEGER NOT NULL,
        threshold INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (submission_id, threshold),
        FOREIGN KEY(submission_id) REFERENCES submissions(id) ON DELETE CASCADE
    );
";
