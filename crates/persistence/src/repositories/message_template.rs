//! Repository for message templates.

use domain::models::message_template::{CreateTemplateRequest, Language, TemplateChannel, TemplateQuery};
use domain::models::notification::{Channel, NotificationType};
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use tracing::info;

use crate::entities::MessageTemplateEntity;
use crate::metrics::QueryTimer;

const TEMPLATE_COLUMNS: &str = r#"
    id, name, notification_type, channel, language, subject, body, is_active,
    is_default, sequence, company_id, created_at, updated_at
"#;

/// Failure of a template write.
#[derive(Debug, Error)]
pub enum TemplateWriteError {
    #[error("A default template already exists for this type/channel/language combination: {0}")]
    DuplicateDefault(String),

    #[error("Template not found")]
    NotFound,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Repository for message template operations.
#[derive(Clone)]
pub struct MessageTemplateRepository {
    pool: PgPool,
}

impl MessageTemplateRepository {
    /// Creates a new message template repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolves the template for a notification.
    ///
    /// Precedence: the tenant's default, any active tenant template, a
    /// default from any tenant, then any active template. A template for
    /// channel `all` matches every channel.
    pub async fn find_for(
        &self,
        notification_type: NotificationType,
        channel: Channel,
        language: Language,
        company_id: Option<i64>,
    ) -> Result<Option<MessageTemplateEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_message_template");
        let sql = format!(
            r#"
            SELECT {TEMPLATE_COLUMNS}
            FROM message_templates
            WHERE notification_type = $1
              AND channel IN ($2, 'all')
              AND language = $3
              AND is_active
            ORDER BY (company_id IS NOT DISTINCT FROM $4) DESC,
                     is_default DESC,
                     sequence ASC,
                     id ASC
            LIMIT 1
            "#
        );
        let result = sqlx::query_as::<_, MessageTemplateEntity>(&sql)
            .bind(notification_type.as_str())
            .bind(channel.as_str())
            .bind(language.as_str())
            .bind(company_id)
            .fetch_optional(&self.pool)
            .await;
        timer.record();
        result
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<MessageTemplateEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_message_template_by_id");
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM message_templates WHERE id = $1");
        let result = sqlx::query_as::<_, MessageTemplateEntity>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await;
        timer.record();
        result
    }

    /// Lists templates ordered by type then sequence.
    pub async fn list(&self, query: &TemplateQuery) -> Result<Vec<MessageTemplateEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_message_templates");
        let sql = format!(
            r#"
            SELECT {TEMPLATE_COLUMNS}
            FROM message_templates
            WHERE ($1::TEXT IS NULL OR notification_type = $1)
              AND ($2::TEXT IS NULL OR channel = $2)
              AND ($3::TEXT IS NULL OR language = $3)
            ORDER BY notification_type, sequence, id
            "#
        );
        let result = sqlx::query_as::<_, MessageTemplateEntity>(&sql)
            .bind(query.notification_type.map(|t| t.as_str()))
            .bind(query.channel.map(|c| c.as_str()))
            .bind(query.language.map(|l| l.as_str()))
            .fetch_all(&self.pool)
            .await;
        timer.record();
        result
    }

    /// Creates a template. A new default is refused while another default
    /// covers the same type, channel, language and tenant.
    pub async fn create(
        &self,
        request: &CreateTemplateRequest,
    ) -> Result<MessageTemplateEntity, TemplateWriteError> {
        let timer = QueryTimer::new("create_message_template");
        let mut tx = self.pool.begin().await?;

        if request.is_default {
            let existing = find_sibling_defaults(
                &mut tx,
                request.notification_type,
                request.channel,
                request.language,
                request.company_id,
            )
            .await?;
            if let Some(name) = existing.into_iter().next() {
                return Err(TemplateWriteError::DuplicateDefault(name));
            }
        }

        let sql = format!(
            r#"
            INSERT INTO message_templates (name, notification_type, channel, language, subject,
                                           body, is_default, sequence, company_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {TEMPLATE_COLUMNS}
            "#
        );
        let template = sqlx::query_as::<_, MessageTemplateEntity>(&sql)
            .bind(&request.name)
            .bind(request.notification_type.as_str())
            .bind(request.channel.as_str())
            .bind(request.language.as_str())
            .bind(&request.subject)
            .bind(&request.body)
            .bind(request.is_default)
            .bind(request.sequence)
            .bind(request.company_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        timer.record();
        info!(template_id = template.id, name = %template.name, "Message template created");
        Ok(template)
    }

    /// Makes a template the default, clearing sibling defaults in the same
    /// transaction.
    pub async fn set_default(&self, id: i64) -> Result<MessageTemplateEntity, TemplateWriteError> {
        let timer = QueryTimer::new("set_default_message_template");
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM message_templates WHERE id = $1 FOR UPDATE");
        let template = sqlx::query_as::<_, MessageTemplateEntity>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(TemplateWriteError::NotFound)?;

        let cleared = sqlx::query(
            r#"
            UPDATE message_templates
            SET is_default = FALSE, updated_at = NOW()
            WHERE id <> $1
              AND notification_type = $2
              AND channel IN ($3, 'all')
              AND language = $4
              AND company_id IS NOT DISTINCT FROM $5
              AND is_default
            "#,
        )
        .bind(id)
        .bind(&template.notification_type)
        .bind(&template.channel)
        .bind(&template.language)
        .bind(template.company_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let sql = format!(
            "UPDATE message_templates SET is_default = TRUE, updated_at = NOW() \
             WHERE id = $1 RETURNING {TEMPLATE_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, MessageTemplateEntity>(&sql)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        timer.record();
        info!(template_id = id, cleared, "Default message template set");
        Ok(updated)
    }
}

/// Names of default templates that would collide with a default for the
/// given key.
async fn find_sibling_defaults(
    tx: &mut Transaction<'_, Postgres>,
    notification_type: NotificationType,
    channel: TemplateChannel,
    language: Language,
    company_id: Option<i64>,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT name FROM message_templates
        WHERE notification_type = $1
          AND channel IN ($2, 'all')
          AND language = $3
          AND company_id IS NOT DISTINCT FROM $4
          AND is_default
        ORDER BY id
        "#,
    )
    .bind(notification_type.as_str())
    .bind(channel.as_str())
    .bind(language.as_str())
    .bind(company_id)
    .fetch_all(&mut **tx)
    .await
}
