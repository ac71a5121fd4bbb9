// Postgres persistence for the mirrored entity graph.
//
// The unit of work is a held transaction: while one is open, every read and
// write routes through it, so scalar stubs written mid-resolution are visible
// to find-by-id lookups before the unit commits. That visibility is what lets
// cyclic references link against uncommitted rows.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::info;

use boorumirror_common::{
    Extension, PostId, PostRecord, Rating, TagCategory, TagId, TagRecord, TrustLevel, UserId,
    UserRecord,
};

use crate::error::{Result, StoreError};

pub struct PgMirrorStore {
    pool: PgPool,
    unit: Mutex<Option<Transaction<'static, Postgres>>>,
}

#[derive(Debug, sqlx::FromRow)]
struct PostRow {
    id: i64,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    width: i32,
    height: i32,
    extension: String,
    size: i64,
    md5: String,
    score_up: i32,
    score_down: i32,
    score_total: i32,
    rating: String,
    fav_count: i32,
    description: String,
    duration: Option<f64>,
    uploader_id: Option<i64>,
    approver_id: Option<i64>,
}

impl TryFrom<PostRow> for PostRecord {
    type Error = StoreError;

    fn try_from(row: PostRow) -> Result<Self> {
        let extension = Extension::parse(&row.extension)
            .ok_or_else(|| StoreError::Decode(format!("post {}: extension {:?}", row.id, row.extension)))?;
        let rating = Rating::parse(&row.rating)
            .ok_or_else(|| StoreError::Decode(format!("post {}: rating {:?}", row.id, row.rating)))?;
        Ok(PostRecord {
            id: row.id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            width: row.width,
            height: row.height,
            extension,
            size: row.size,
            md5: row.md5,
            score_up: row.score_up,
            score_down: row.score_down,
            score_total: row.score_total,
            rating,
            fav_count: row.fav_count,
            description: row.description,
            duration: row.duration,
            uploader_id: row.uploader_id,
            approver_id: row.approver_id,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    created_at: DateTime<Utc>,
    name: String,
    level: String,
    is_banned: bool,
    avatar_id: Option<i64>,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self> {
        let level = TrustLevel::parse(&row.level)
            .ok_or_else(|| StoreError::Decode(format!("user {}: level {:?}", row.id, row.level)))?;
        Ok(UserRecord {
            id: row.id,
            created_at: row.created_at,
            name: row.name,
            level,
            is_banned: row.is_banned,
            avatar_id: row.avatar_id,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TagRow {
    id: i64,
    text: String,
    category: String,
}

impl TryFrom<TagRow> for TagRecord {
    type Error = StoreError;

    fn try_from(row: TagRow) -> Result<Self> {
        let category = TagCategory::parse(&row.category)
            .ok_or_else(|| StoreError::Decode(format!("tag {}: category {:?}", row.id, row.category)))?;
        Ok(TagRecord {
            id: row.id,
            text: row.text,
            category,
        })
    }
}

impl PgMirrorStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            unit: Mutex::new(None),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    // --- Unit of work ---

    pub async fn begin_unit(&self) -> Result<()> {
        let mut unit = self.unit.lock().await;
        if unit.is_some() {
            return Err(StoreError::UnitAlreadyOpen);
        }
        *unit = Some(self.pool.begin().await?);
        Ok(())
    }

    pub async fn commit_unit(&self) -> Result<()> {
        let tx = self.unit.lock().await.take().ok_or(StoreError::NoOpenUnit)?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn rollback_unit(&self) -> Result<()> {
        let tx = self.unit.lock().await.take().ok_or(StoreError::NoOpenUnit)?;
        tx.rollback().await?;
        Ok(())
    }

    // --- Lookups ---

    pub async fn find_post(&self, id: PostId) -> Result<Option<PostRecord>> {
        let q = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT id, created_at, updated_at, width, height, extension, size, md5,
                   score_up, score_down, score_total, rating, fav_count, description,
                   duration, uploader_id, approver_id
            FROM posts
            WHERE id = $1
            "#,
        )
        .bind(id);

        let mut unit = self.unit.lock().await;
        let row = match unit.as_mut() {
            Some(tx) => q.fetch_optional(&mut **tx).await?,
            None => q.fetch_optional(&self.pool).await?,
        };
        row.map(PostRecord::try_from).transpose()
    }

    pub async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>> {
        let q = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, created_at, name, level, is_banned, avatar_id
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id);

        let mut unit = self.unit.lock().await;
        let row = match unit.as_mut() {
            Some(tx) => q.fetch_optional(&mut **tx).await?,
            None => q.fetch_optional(&self.pool).await?,
        };
        row.map(UserRecord::try_from).transpose()
    }

    pub async fn is_tombstoned(&self, id: PostId) -> Result<bool> {
        let q = sqlx::query_scalar::<_, i64>("SELECT count(*) FROM destroyed_posts WHERE id = $1")
            .bind(id);

        let mut unit = self.unit.lock().await;
        let count = match unit.as_mut() {
            Some(tx) => q.fetch_one(&mut **tx).await?,
            None => q.fetch_one(&self.pool).await?,
        };
        Ok(count > 0)
    }

    /// Tags already known for any of the given texts, in one batched query.
    pub async fn tags_by_text(&self, texts: &[String]) -> Result<Vec<TagRecord>> {
        let q = sqlx::query_as::<_, TagRow>(
            "SELECT id, text, category FROM tags WHERE text = ANY($1)",
        )
        .bind(texts);

        let mut unit = self.unit.lock().await;
        let rows = match unit.as_mut() {
            Some(tx) => q.fetch_all(&mut **tx).await?,
            None => q.fetch_all(&self.pool).await?,
        };
        rows.into_iter().map(TagRecord::try_from).collect()
    }

    /// Highest mirrored post id, if any. Watermark recovery at startup.
    pub async fn max_post_id(&self) -> Result<Option<PostId>> {
        let q = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(id) FROM posts");

        let mut unit = self.unit.lock().await;
        let max = match unit.as_mut() {
            Some(tx) => q.fetch_one(&mut **tx).await?,
            None => q.fetch_one(&self.pool).await?,
        };
        Ok(max)
    }

    // --- Inserts ---

    pub async fn insert_post(&self, post: &PostRecord) -> Result<()> {
        let q = sqlx::query(
            r#"
            INSERT INTO posts
                (id, created_at, updated_at, width, height, extension, size, md5,
                 score_up, score_down, score_total, rating, fav_count, description,
                 duration, uploader_id, approver_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(post.id)
        .bind(post.created_at)
        .bind(post.updated_at)
        .bind(post.width)
        .bind(post.height)
        .bind(post.extension.as_str())
        .bind(post.size)
        .bind(&post.md5)
        .bind(post.score_up)
        .bind(post.score_down)
        .bind(post.score_total)
        .bind(post.rating.as_str())
        .bind(post.fav_count)
        .bind(&post.description)
        .bind(post.duration)
        .bind(post.uploader_id)
        .bind(post.approver_id);

        self.execute(q).await
    }

    pub async fn insert_user(&self, user: &UserRecord) -> Result<()> {
        let q = sqlx::query(
            r#"
            INSERT INTO users (id, created_at, name, level, is_banned, avatar_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(user.id)
        .bind(user.created_at)
        .bind(&user.name)
        .bind(user.level.as_str())
        .bind(user.is_banned)
        .bind(user.avatar_id);

        self.execute(q).await
    }

    pub async fn insert_tag(&self, tag: &TagRecord) -> Result<()> {
        let q = sqlx::query("INSERT INTO tags (id, text, category) VALUES ($1, $2, $3)")
            .bind(tag.id)
            .bind(&tag.text)
            .bind(tag.category.as_str());

        self.execute(q).await
    }

    pub async fn insert_tombstone(&self, id: PostId) -> Result<()> {
        let q = sqlx::query("INSERT INTO destroyed_posts (id) VALUES ($1)").bind(id);
        self.execute(q).await
    }

    pub async fn insert_media(&self, post: PostId, bytes: &[u8]) -> Result<()> {
        let q = sqlx::query("INSERT INTO post_media (post_id, bytes) VALUES ($1, $2)")
            .bind(post)
            .bind(bytes);
        self.execute(q).await
    }

    pub async fn insert_sources(&self, post: PostId, urls: &[String]) -> Result<()> {
        for url in urls {
            let q = sqlx::query("INSERT INTO post_sources (post_id, url) VALUES ($1, $2)")
                .bind(post)
                .bind(url);
            self.execute(q).await?;
        }
        Ok(())
    }

    // --- Relation links ---

    pub async fn set_post_uploader(&self, post: PostId, user: UserId) -> Result<()> {
        let q = sqlx::query("UPDATE posts SET uploader_id = $2 WHERE id = $1")
            .bind(post)
            .bind(user);
        self.execute(q).await
    }

    pub async fn set_post_approver(&self, post: PostId, user: UserId) -> Result<()> {
        let q = sqlx::query("UPDATE posts SET approver_id = $2 WHERE id = $1")
            .bind(post)
            .bind(user);
        self.execute(q).await
    }

    pub async fn set_user_avatar(&self, user: UserId, post: PostId) -> Result<()> {
        let q = sqlx::query("UPDATE users SET avatar_id = $2 WHERE id = $1")
            .bind(user)
            .bind(post);
        self.execute(q).await
    }

    pub async fn link_child(&self, parent: PostId, child: PostId, position: i32) -> Result<()> {
        let q = sqlx::query(
            "INSERT INTO post_children (parent_id, child_id, position) VALUES ($1, $2, $3)",
        )
        .bind(parent)
        .bind(child)
        .bind(position);
        self.execute(q).await
    }

    pub async fn link_tags(&self, post: PostId, tags: &[TagId]) -> Result<()> {
        for tag in tags {
            let q = sqlx::query("INSERT INTO post_tags (post_id, tag_id) VALUES ($1, $2)")
                .bind(post)
                .bind(tag);
            self.execute(q).await?;
        }
        Ok(())
    }

    async fn execute(
        &self,
        q: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<()> {
        let mut unit = self.unit.lock().await;
        let result = match unit.as_mut() {
            Some(tx) => q.execute(&mut **tx).await,
            None => q.execute(&self.pool).await,
        };
        result.map_err(map_write_err)?;
        Ok(())
    }
}

fn map_write_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Constraint(db.message().to_string())
        }
        _ => StoreError::Database(e),
    }
}
