use anyhow::{anyhow, Context};
use async_trait::async_trait;
use komento_api::{
    CommentNode, CommentVersion, LockStatus, NodeId, ParentRef, Time, TreeRoot, TreeStore, UserId,
    Uuid, VersionId,
};
use sqlx::{postgres::PgRow, Row};

/// Postgres error code for a `NOWAIT` lock that could not be granted.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Width of one sibling-rank segment in the materialized path. Fixed width
/// keeps lexicographic path order equal to pre-order.
const RANK_WIDTH: usize = 8;

/// [`TreeStore`] over one Postgres connection, which the caller has
/// already placed inside a transaction. Locks taken through [`try_lock`]
/// are ordinary row locks and vanish with the transaction.
///
/// [`try_lock`]: TreeStore::try_lock
pub struct PgStore<'c> {
    pub conn: &'c mut sqlx::PgConnection,
}

fn node_from_row(row: &PgRow) -> anyhow::Result<CommentNode> {
    Ok(CommentNode {
        id: NodeId(row.try_get("id").context("retrieving the id field")?),
        root: NodeId(
            row.try_get("root_id")
                .context("retrieving the root_id field")?,
        ),
        parent: row
            .try_get::<Option<Uuid>, _>("parent_id")
            .context("retrieving the parent_id field")?
            .map(NodeId),
        level: row.try_get("level").context("retrieving the level field")?,
        deleted: row
            .try_get("deleted")
            .context("retrieving the deleted field")?,
        deleted_by: row
            .try_get::<Option<Uuid>, _>("deleted_by")
            .context("retrieving the deleted_by field")?
            .map(UserId),
        created_by: row
            .try_get::<Option<Uuid>, _>("created_by")
            .context("retrieving the created_by field")?
            .map(UserId),
        date: row.try_get("date").context("retrieving the date field")?,
    })
}

fn version_from_row(row: &PgRow) -> anyhow::Result<CommentVersion> {
    Ok(CommentVersion {
        id: VersionId(row.try_get("id").context("retrieving the id field")?),
        node: NodeId(
            row.try_get("comment_id")
                .context("retrieving the comment_id field")?,
        ),
        body: row.try_get("body").context("retrieving the body field")?,
        author: UserId(
            row.try_get("posted_by")
                .context("retrieving the posted_by field")?,
        ),
        date: row.try_get("date").context("retrieving the date field")?,
    })
}

const NODE_FIELDS: &str = "id, root_id, parent_id, level, deleted, deleted_by, created_by, date";
const VERSION_FIELDS: &str = "id, comment_id, body, posted_by, date";

#[async_trait]
impl TreeStore for PgStore<'_> {
    async fn get_or_create_root(
        &mut self,
        parent: &ParentRef,
        max_depth: i32,
        now: Time,
    ) -> anyhow::Result<TreeRoot> {
        // Insert-or-fetch under the partial unique index: whoever loses the
        // insert race converges on the winner's row in the re-select.
        sqlx::query(
            "
                INSERT INTO comments
                    (id, root_id, parent_id, level, path, created_by, date,
                     parent_type, parent_object, max_depth)
                VALUES ($1, $1, NULL, 0, '', NULL, $2, $3, $4, $5)
                ON CONFLICT (parent_type, parent_object) WHERE parent_id IS NULL
                DO NOTHING
            ",
        )
        .bind(Uuid::new_v4())
        .bind(now)
        .bind(&parent.object_type)
        .bind(parent.object_id)
        .bind(max_depth)
        .execute(&mut *self.conn)
        .await
        .with_context(|| format!("inserting tree root for {parent:?}"))?;

        let row = sqlx::query(
            "
                SELECT id, max_depth, date
                    FROM comments
                WHERE parent_type = $1
                AND parent_object = $2
                AND parent_id IS NULL
            ",
        )
        .bind(&parent.object_type)
        .bind(parent.object_id)
        .fetch_one(&mut *self.conn)
        .await
        .with_context(|| format!("fetching tree root for {parent:?}"))?;

        Ok(TreeRoot {
            id: NodeId(row.try_get("id").context("retrieving the id field")?),
            parent: parent.clone(),
            max_depth: row
                .try_get("max_depth")
                .context("retrieving the max_depth field")?,
            date: row.try_get("date").context("retrieving the date field")?,
        })
    }

    async fn root_of(&mut self, node: &CommentNode) -> anyhow::Result<TreeRoot> {
        let row = sqlx::query(
            "
                SELECT id, parent_type, parent_object, max_depth, date
                    FROM comments
                WHERE id = $1
                AND parent_id IS NULL
            ",
        )
        .bind(node.root.0)
        .fetch_one(&mut *self.conn)
        .await
        .with_context(|| format!("fetching tree root of node {:?}", node.id))?;

        Ok(TreeRoot {
            id: NodeId(row.try_get("id").context("retrieving the id field")?),
            parent: ParentRef {
                object_type: row
                    .try_get("parent_type")
                    .context("retrieving the parent_type field")?,
                object_id: row
                    .try_get("parent_object")
                    .context("retrieving the parent_object field")?,
            },
            max_depth: row
                .try_get("max_depth")
                .context("retrieving the max_depth field")?,
            date: row.try_get("date").context("retrieving the date field")?,
        })
    }

    async fn node(&mut self, id: NodeId) -> anyhow::Result<Option<CommentNode>> {
        let row = sqlx::query(&format!("SELECT {NODE_FIELDS} FROM comments WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&mut *self.conn)
            .await
            .with_context(|| format!("fetching node {id:?}"))?;
        row.as_ref().map(node_from_row).transpose()
    }

    async fn insert_node(
        &mut self,
        parent: &CommentNode,
        author: UserId,
        now: Time,
    ) -> anyhow::Result<CommentNode> {
        // The counter bump takes the parent's row lock, so concurrent
        // sibling inserts serialize there and get distinct ranks.
        let row = sqlx::query(
            "
                UPDATE comments
                    SET child_count = child_count + 1
                WHERE id = $1
                RETURNING root_id, level, path, child_count
            ",
        )
        .bind(parent.id.0)
        .fetch_one(&mut *self.conn)
        .await
        .with_context(|| format!("claiming a sibling rank under {:?}", parent.id))?;

        let root: Uuid = row
            .try_get("root_id")
            .context("retrieving the root_id field")?;
        let level: i32 = row.try_get("level").context("retrieving the level field")?;
        let parent_path: String = row.try_get("path").context("retrieving the path field")?;
        let rank: i32 = row
            .try_get("child_count")
            .context("retrieving the child_count field")?;

        let id = Uuid::new_v4();
        let path = format!("{parent_path}{rank:0width$}", width = RANK_WIDTH);
        let res = sqlx::query(
            "
                INSERT INTO comments (id, root_id, parent_id, level, path, created_by, date)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(id)
        .bind(root)
        .bind(parent.id.0)
        .bind(level + 1)
        .bind(&path)
        .bind(author.0)
        .bind(now)
        .execute(&mut *self.conn)
        .await
        .with_context(|| format!("inserting node under {:?}", parent.id))?;
        anyhow::ensure!(
            res.rows_affected() == 1,
            "insertion of node {id:?} affected {} rows",
            res.rows_affected()
        );

        Ok(CommentNode {
            id: NodeId(id),
            root: NodeId(root),
            parent: Some(parent.id),
            level: level + 1,
            deleted: false,
            deleted_by: None,
            created_by: Some(author),
            date: now,
        })
    }

    async fn descendants(&mut self, id: NodeId) -> anyhow::Result<Vec<CommentNode>> {
        let row = sqlx::query("SELECT root_id, path FROM comments WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&mut *self.conn)
            .await
            .with_context(|| format!("fetching path of node {id:?}"))?
            .ok_or_else(|| anyhow!("requested descendants of node {id:?} that is not in store"))?;
        let root: Uuid = row
            .try_get("root_id")
            .context("retrieving the root_id field")?;
        let path: String = row.try_get("path").context("retrieving the path field")?;

        // Ranks are fixed-width digits, so a path prefix match selects
        // exactly the subtree and ORDER BY path is pre-order.
        sqlx::query(&format!(
            "
                SELECT {NODE_FIELDS}
                    FROM comments
                WHERE root_id = $1
                AND path LIKE $2 || '%'
                AND id <> $3
                ORDER BY path
            "
        ))
        .bind(root)
        .bind(&path)
        .bind(id.0)
        .fetch_all(&mut *self.conn)
        .await
        .with_context(|| format!("fetching descendants of node {id:?}"))?
        .iter()
        .map(node_from_row)
        .collect()
    }

    async fn count_descendants(&mut self, root: &TreeRoot) -> anyhow::Result<i64> {
        let row = sqlx::query("SELECT count(*) AS total FROM comments WHERE root_id = $1 AND id <> $1")
            .bind(root.id.0)
            .fetch_one(&mut *self.conn)
            .await
            .with_context(|| format!("counting descendants of root {:?}", root.id))?;
        row.try_get("total").context("retrieving the total field")
    }

    async fn try_lock(&mut self, id: NodeId) -> anyhow::Result<LockStatus> {
        match sqlx::query("SELECT id FROM comments WHERE id = $1 FOR UPDATE NOWAIT")
            .bind(id.0)
            .fetch_optional(&mut *self.conn)
            .await
        {
            Ok(Some(_)) => Ok(LockStatus::Acquired),
            Ok(None) => Err(anyhow!("requested lock on node {id:?} that is not in store")),
            Err(sqlx::Error::Database(err)) if err.code().as_deref() == Some(LOCK_NOT_AVAILABLE) => {
                Ok(LockStatus::Busy)
            }
            Err(err) => Err(err).with_context(|| format!("locking node {id:?}")),
        }
    }

    async fn latest_version(&mut self, id: NodeId) -> anyhow::Result<Option<CommentVersion>> {
        let row = sqlx::query(&format!(
            "
                SELECT {VERSION_FIELDS}
                    FROM comment_versions
                WHERE comment_id = $1
                ORDER BY date DESC, seq DESC
                LIMIT 1
            "
        ))
        .bind(id.0)
        .fetch_optional(&mut *self.conn)
        .await
        .with_context(|| format!("fetching latest version of node {id:?}"))?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn versions(&mut self, id: NodeId) -> anyhow::Result<Vec<CommentVersion>> {
        sqlx::query(&format!(
            "
                SELECT {VERSION_FIELDS}
                    FROM comment_versions
                WHERE comment_id = $1
                ORDER BY date, seq
            "
        ))
        .bind(id.0)
        .fetch_all(&mut *self.conn)
        .await
        .with_context(|| format!("fetching versions of node {id:?}"))?
        .iter()
        .map(version_from_row)
        .collect()
    }

    async fn append_version(
        &mut self,
        id: NodeId,
        body: &str,
        author: UserId,
        now: Time,
    ) -> anyhow::Result<CommentVersion> {
        let version = Uuid::new_v4();
        let res = sqlx::query(
            "
                INSERT INTO comment_versions (id, comment_id, body, posted_by, date)
                VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(version)
        .bind(id.0)
        .bind(body)
        .bind(author.0)
        .bind(now)
        .execute(&mut *self.conn)
        .await
        .with_context(|| format!("appending version to node {id:?}"))?;
        anyhow::ensure!(
            res.rows_affected() == 1,
            "insertion of version {version:?} affected {} rows",
            res.rows_affected()
        );
        Ok(CommentVersion {
            id: VersionId(version),
            node: id,
            body: body.to_string(),
            author,
            date: now,
        })
    }

    async fn mark_deleted(&mut self, ids: &[NodeId], actor: UserId) -> anyhow::Result<u64> {
        let raw: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
        let res = sqlx::query(
            "
                UPDATE comments
                    SET deleted = true, deleted_by = $2
                WHERE id = ANY($1)
                AND deleted = false
            ",
        )
        .bind(&raw)
        .bind(actor.0)
        .execute(&mut *self.conn)
        .await
        .context("marking nodes deleted")?;
        Ok(res.rows_affected())
    }
}
