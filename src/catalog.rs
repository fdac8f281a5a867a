//! SQLite-backed catalog of studies, subjects and timecourses. The lineage
//! graph is loaded into memory at open and kept in step with every write.

use std::fs;

use camino::Utf8Path;
use chrono::{Local, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

use crate::domain::{
    Data, NewSubject, Study, StudyId, StudyRef, Subject, SubjectId, SubjectRef, TIMESTAMP_FORMAT,
    Timecourse, TimecourseId, TransformData,
};
use crate::error::ExpdbError;
use crate::graph::LineageGraph;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS studies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    github_repo TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS subjects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    name TEXT,
    age INTEGER,
    meditation_experience INTEGER
);

CREATE TABLE IF NOT EXISTS study_subjects (
    study_id INTEGER NOT NULL,
    subject_id INTEGER NOT NULL,
    PRIMARY KEY (study_id, subject_id),
    FOREIGN KEY (study_id) REFERENCES studies(id) ON DELETE CASCADE,
    FOREIGN KEY (subject_id) REFERENCES subjects(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS timecourses (
    id INTEGER PRIMARY KEY,
    sampling_rate REAL NOT NULL,
    modality TEXT NOT NULL,
    data_type TEXT NOT NULL,
    transform_names TEXT NOT NULL,
    transform_params TEXT NOT NULL,
    git_commit TEXT NOT NULL,
    path TEXT NOT NULL UNIQUE,
    description TEXT,
    date_collected TEXT NOT NULL,
    is_pilot INTEGER NOT NULL DEFAULT 0,
    study_id INTEGER NOT NULL,
    subject_id INTEGER NOT NULL,
    FOREIGN KEY (study_id) REFERENCES studies(id) ON DELETE CASCADE,
    FOREIGN KEY (subject_id) REFERENCES subjects(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_timecourses_subject ON timecourses(subject_id, modality);

CREATE TABLE IF NOT EXISTS timecourse_lineage (
    child_id INTEGER NOT NULL,
    parent_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (child_id, parent_id),
    FOREIGN KEY (child_id) REFERENCES timecourses(id) ON DELETE CASCADE,
    FOREIGN KEY (parent_id) REFERENCES timecourses(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS sequences (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);

INSERT OR IGNORE INTO sequences (name, value) VALUES ('timecourse', 0);
"#;

const TIMECOURSE_COLUMNS: &str = "t.id, t.sampling_rate, t.modality, t.data_type, \
     t.transform_names, t.transform_params, t.git_commit, t.path, t.description, \
     t.date_collected, t.is_pilot, t.study_id, s.name, t.subject_id, j.code";

/// One open catalog session. Writes take `&mut self`; there is no locking
/// across processes sharing a database file.
pub struct Catalog {
    conn: Connection,
    graph: LineageGraph,
}

impl Catalog {
    pub fn open(path: &Utf8Path) -> Result<Self, ExpdbError> {
        if let Some(parent) = path.parent()
            && !parent.as_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| ExpdbError::Filesystem(err.to_string()))?;
        }
        let conn = Connection::open(path.as_std_path())?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, ExpdbError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, ExpdbError> {
        conn.execute("PRAGMA foreign_keys=ON;", [])?;
        conn.execute_batch(SCHEMA)?;
        let mut catalog = Self {
            conn,
            graph: LineageGraph::new(),
        };
        catalog.reload_graph()?;
        Ok(catalog)
    }

    pub fn graph(&self) -> &LineageGraph {
        &self.graph
    }

    pub fn timecourse(&self, id: TimecourseId) -> Result<&Timecourse, ExpdbError> {
        self.graph
            .get(id)
            .ok_or_else(|| ExpdbError::NotFound(format!("timecourse {id}")))
    }

    pub fn create_study(
        &mut self,
        name: &str,
        description: Option<&str>,
        github_repo: &str,
    ) -> Result<Study, ExpdbError> {
        let created_at = Local::now().naive_local();
        self.conn.execute(
            "INSERT INTO studies (name, description, github_repo, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                name,
                description,
                github_repo,
                created_at.format(TIMESTAMP_FORMAT).to_string()
            ],
        )?;
        let id = StudyId(self.conn.last_insert_rowid());
        info!(%id, name, "created study");
        Ok(Study {
            id,
            name: name.to_string(),
            description: description.map(str::to_string),
            github_repo: github_repo.to_string(),
            created_at,
        })
    }

    pub fn create_subject(&mut self, subject: NewSubject) -> Result<Subject, ExpdbError> {
        self.conn.execute(
            "INSERT INTO subjects (code, name, age, meditation_experience) VALUES (?1, ?2, ?3, ?4)",
            params![
                subject.code,
                subject.name,
                subject.age,
                subject.meditation_experience
            ],
        )?;
        let id = SubjectId(self.conn.last_insert_rowid());
        info!(%id, code = %subject.code, "created subject");
        Ok(Subject {
            id,
            code: subject.code,
            name: subject.name,
            age: subject.age,
            meditation_experience: subject.meditation_experience,
        })
    }

    /// Adds a subject to a study. Enrolling twice is a no-op.
    pub fn enroll(&mut self, study: StudyId, subject: SubjectId) -> Result<(), ExpdbError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO study_subjects (study_id, subject_id) VALUES (?1, ?2)",
            params![study.0, subject.0],
        )?;
        Ok(())
    }

    pub fn studies(&self) -> Result<Vec<Study>, ExpdbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, description, github_repo, created_at FROM studies ORDER BY id",
        )?;
        let rows = stmt.query_map([], study_row)?;
        rows.map(|row| row?.into_study()).collect()
    }

    pub fn study(&self, id: StudyId) -> Result<Study, ExpdbError> {
        self.conn
            .query_row(
                "SELECT id, name, description, github_repo, created_at FROM studies WHERE id = ?1",
                [id.0],
                study_row,
            )
            .optional()?
            .ok_or_else(|| ExpdbError::NotFound(format!("study {id}")))?
            .into_study()
    }

    pub fn study_by_name(&self, name: &str) -> Result<Study, ExpdbError> {
        self.conn
            .query_row(
                "SELECT id, name, description, github_repo, created_at FROM studies WHERE name = ?1",
                [name],
                study_row,
            )
            .optional()?
            .ok_or_else(|| ExpdbError::NotFound(format!("study {name}")))?
            .into_study()
    }

    pub fn subject(&self, id: SubjectId) -> Result<Subject, ExpdbError> {
        self.conn
            .query_row(
                "SELECT id, code, name, age, meditation_experience FROM subjects WHERE id = ?1",
                [id.0],
                subject_row,
            )
            .optional()?
            .ok_or_else(|| ExpdbError::NotFound(format!("subject {id}")))
    }

    pub fn subject_by_code(&self, code: &str) -> Result<Subject, ExpdbError> {
        self.conn
            .query_row(
                "SELECT id, code, name, age, meditation_experience FROM subjects WHERE code = ?1",
                [code],
                subject_row,
            )
            .optional()?
            .ok_or_else(|| ExpdbError::NotFound(format!("subject {code}")))
    }

    pub fn subjects_in_study(&self, study: StudyId) -> Result<Vec<Subject>, ExpdbError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.code, s.name, s.age, s.meditation_experience
             FROM subjects s
             JOIN study_subjects e ON e.subject_id = s.id
             WHERE e.study_id = ?1
             ORDER BY s.id",
        )?;
        let rows = stmt.query_map([study.0], subject_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Removes a study with its enrollments and timecourses.
    pub fn delete_study(&mut self, id: StudyId) -> Result<(), ExpdbError> {
        let deleted = self
            .conn
            .execute("DELETE FROM studies WHERE id = ?1", [id.0])?;
        if deleted == 0 {
            return Err(ExpdbError::NotFound(format!("study {id}")));
        }
        info!(%id, "deleted study");
        self.reload_graph()
    }

    /// Removes a subject with its enrollments and timecourses.
    pub fn delete_subject(&mut self, id: SubjectId) -> Result<(), ExpdbError> {
        let deleted = self
            .conn
            .execute("DELETE FROM subjects WHERE id = ?1", [id.0])?;
        if deleted == 0 {
            return Err(ExpdbError::NotFound(format!("subject {id}")));
        }
        info!(%id, "deleted subject");
        self.reload_graph()
    }

    /// Reserves the next timecourse id. Ids are never reused.
    pub fn next_timecourse_id(&mut self) -> Result<TimecourseId, ExpdbError> {
        let value: i64 = self.conn.query_row(
            "UPDATE sequences SET value = value + 1 WHERE name = 'timecourse' RETURNING value",
            [],
            |row| row.get(0),
        )?;
        Ok(TimecourseId(value))
    }

    /// Persists a timecourse and its parent edges in one transaction, then
    /// adds it to the in-memory graph. Returns ids whose pilot flag changed
    /// because the new edges merged components.
    pub fn insert_timecourse(
        &mut self,
        timecourse: Timecourse,
        derived_from: &[TimecourseId],
    ) -> Result<Vec<TimecourseId>, ExpdbError> {
        if let Some(missing) = derived_from.iter().find(|&&id| !self.graph.contains(id)) {
            return Err(ExpdbError::Integrity(format!(
                "parent timecourse {missing} does not exist"
            )));
        }
        let changed = self
            .graph
            .merge_changes(timecourse.is_pilot, derived_from)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO timecourses (id, sampling_rate, modality, data_type, transform_names,
                transform_params, git_commit, path, description, date_collected, is_pilot,
                study_id, subject_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                timecourse.id.0,
                timecourse.data.sampling_rate(),
                timecourse.data.modality().as_str(),
                timecourse.data.data_type().as_str(),
                timecourse.transform.names_json(),
                timecourse.transform.params_json(),
                timecourse.transform.git_commit(),
                timecourse.path,
                timecourse.description,
                timecourse
                    .date_collected
                    .format(TIMESTAMP_FORMAT)
                    .to_string(),
                timecourse.is_pilot,
                timecourse.study.id.0,
                timecourse.subject.id.0,
            ],
        )?;
        let mut position = 0i64;
        let mut seen = Vec::with_capacity(derived_from.len());
        for parent in derived_from {
            if seen.contains(parent) {
                continue;
            }
            seen.push(*parent);
            tx.execute(
                "INSERT INTO timecourse_lineage (child_id, parent_id, position) VALUES (?1, ?2, ?3)",
                params![timecourse.id.0, parent.0, position],
            )?;
            position += 1;
        }
        for id in &changed {
            tx.execute(
                "UPDATE timecourses SET is_pilot = ?1 WHERE id = ?2",
                params![timecourse.is_pilot, id.0],
            )?;
        }
        tx.commit()?;

        let id = timecourse.id;
        let changed = self.graph.insert(timecourse, derived_from)?;
        info!(%id, parents = seen.len(), "inserted timecourse");
        Ok(changed)
    }

    /// Sets the pilot flag across the component containing `id`.
    pub fn set_is_pilot(
        &mut self,
        id: TimecourseId,
        is_pilot: bool,
    ) -> Result<Vec<TimecourseId>, ExpdbError> {
        let changed = self.graph.pilot_changes(id, is_pilot)?;
        let tx = self.conn.transaction()?;
        for changed_id in &changed {
            tx.execute(
                "UPDATE timecourses SET is_pilot = ?1 WHERE id = ?2",
                params![is_pilot, changed_id.0],
            )?;
        }
        tx.commit()?;
        self.graph.set_is_pilot(id, is_pilot)
    }

    fn reload_graph(&mut self) -> Result<(), ExpdbError> {
        let mut graph = LineageGraph::new();
        let timecourses = {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {TIMECOURSE_COLUMNS}
                 FROM timecourses t
                 JOIN studies s ON s.id = t.study_id
                 JOIN subjects j ON j.id = t.subject_id
                 ORDER BY t.id"
            ))?;
            let rows = stmt.query_map([], timecourse_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        let mut edges = {
            let mut stmt = self.conn.prepare(
                "SELECT child_id, parent_id FROM timecourse_lineage ORDER BY child_id, position",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((TimecourseId(row.get(0)?), TimecourseId(row.get(1)?)))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        }
        .into_iter()
        .peekable();

        for row in timecourses {
            let timecourse = row.into_timecourse()?;
            let mut parents = Vec::new();
            while let Some((_, parent)) = edges.next_if(|(child, _)| *child == timecourse.id) {
                parents.push(parent);
            }
            graph.insert(timecourse, &parents)?;
        }
        debug!(timecourses = graph.len(), "loaded lineage graph");
        self.graph = graph;
        Ok(())
    }
}

struct StudyRow {
    id: i64,
    name: String,
    description: Option<String>,
    github_repo: String,
    created_at: String,
}

impl StudyRow {
    fn into_study(self) -> Result<Study, ExpdbError> {
        Ok(Study {
            id: StudyId(self.id),
            name: self.name,
            description: self.description,
            github_repo: self.github_repo,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn study_row(row: &Row<'_>) -> rusqlite::Result<StudyRow> {
    Ok(StudyRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        github_repo: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn subject_row(row: &Row<'_>) -> rusqlite::Result<Subject> {
    Ok(Subject {
        id: SubjectId(row.get(0)?),
        code: row.get(1)?,
        name: row.get(2)?,
        age: row.get(3)?,
        meditation_experience: row.get(4)?,
    })
}

struct TimecourseRow {
    id: i64,
    sampling_rate: f64,
    modality: String,
    data_type: String,
    transform_names: String,
    transform_params: String,
    git_commit: String,
    path: String,
    description: Option<String>,
    date_collected: String,
    is_pilot: bool,
    study_id: i64,
    study_name: String,
    subject_id: i64,
    subject_code: String,
}

impl TimecourseRow {
    fn into_timecourse(self) -> Result<Timecourse, ExpdbError> {
        Ok(Timecourse {
            id: TimecourseId(self.id),
            data: Data::parse(self.sampling_rate, &self.modality, &self.data_type)?,
            transform: TransformData::from_json(
                &self.transform_names,
                &self.transform_params,
                self.git_commit,
            )?,
            path: self.path,
            description: self.description,
            date_collected: parse_timestamp(&self.date_collected)?,
            is_pilot: self.is_pilot,
            study: StudyRef {
                id: StudyId(self.study_id),
                name: self.study_name,
            },
            subject: SubjectRef {
                id: SubjectId(self.subject_id),
                code: self.subject_code,
            },
        })
    }
}

fn timecourse_row(row: &Row<'_>) -> rusqlite::Result<TimecourseRow> {
    Ok(TimecourseRow {
        id: row.get(0)?,
        sampling_rate: row.get(1)?,
        modality: row.get(2)?,
        data_type: row.get(3)?,
        transform_names: row.get(4)?,
        transform_params: row.get(5)?,
        git_commit: row.get(6)?,
        path: row.get(7)?,
        description: row.get(8)?,
        date_collected: row.get(9)?,
        is_pilot: row.get(10)?,
        study_id: row.get(11)?,
        study_name: row.get(12)?,
        subject_id: row.get(13)?,
        subject_code: row.get(14)?,
    })
}

fn parse_timestamp(value: &str) -> Result<NaiveDateTime, ExpdbError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map_err(|err| ExpdbError::Validation(format!("bad timestamp {value}: {err}")))
}
