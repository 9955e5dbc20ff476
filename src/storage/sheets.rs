use super::{SheetStore, TokenProvider, HTTP_TIMEOUT_SECS};
use crate::db::{RowFields, Timestamp};
use crate::error::{classify_status, SyncError, SyncResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DRIVE_API: &str = "https://www.googleapis.com/drive/v3/files";
const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";
/// 数据列为 A..D（名、姓、邮箱、电话）
const LAST_COLUMN: &str = "D";
/// 表头占用的行数
pub const HEADER_ROWS: usize = 1;

#[derive(Debug, Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveModified {
    modified_time: Timestamp,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// 电子表格第一个工作表的存储实现
pub struct GoogleSheetStore {
    client: reqwest::Client,
    auth: TokenProvider,
    spreadsheet_id: String,
    sheet_id: i64,
    sheet_title: String,
    name: String,
}

/// 创建带超时的 HTTP 客户端
pub fn http_client() -> SyncResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .map_err(|e| SyncError::Fatal(format!("创建 HTTP 客户端失败: {}", e)))
}

/// A1 表示法中的工作表名需要用单引号包裹
fn quote_sheet_title(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

/// Drive 查询字符串中的单引号需要转义
fn escape_drive_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// 数据行位置转换为 0 起始的网格行号
fn grid_index(position: usize) -> usize {
    position.saturating_sub(1) + HEADER_ROWS
}

/// 构造 updateCells 请求的行数据
fn cell_rows(rows: &[RowFields]) -> Vec<Value> {
    rows.iter()
        .map(|row| {
            let values: Vec<Value> = row
                .to_cells()
                .into_iter()
                .map(|cell| json!({ "userEnteredValue": { "stringValue": cell } }))
                .collect();
            json!({ "values": values })
        })
        .collect()
}

impl GoogleSheetStore {
    /// 按标题打开表格，找不到时返回配置错误
    pub async fn open(client: reqwest::Client, auth: TokenProvider, title: &str) -> SyncResult<Self> {
        let mut store = Self {
            client,
            auth,
            spreadsheet_id: String::new(),
            sheet_id: 0,
            sheet_title: String::new(),
            name: format!("gsheet:{}", title),
        };

        let query = format!(
            "name = '{}' and mimeType = '{}' and trashed = false",
            escape_drive_query(title),
            SPREADSHEET_MIME
        );
        let url = format!(
            "{}?q={}&fields=files(id)&pageSize=1&supportsAllDrives=true&includeItemsFromAllDrives=true",
            DRIVE_API,
            urlencoding::encode(&query)
        );
        let found: DriveFileList = store.get_json(&url).await?;
        let file = found.files.into_iter().next().ok_or_else(|| {
            SyncError::Config(format!(
                "找不到表格 {}（请确认已共享给 {}）",
                title,
                store.auth.client_email()
            ))
        })?;
        store.spreadsheet_id = file.id;

        let url = format!(
            "{}/{}?fields=sheets.properties(sheetId,title)",
            SHEETS_API, store.spreadsheet_id
        );
        let meta: SpreadsheetMeta = store.get_json(&url).await?;
        let first = meta
            .sheets
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::Config(format!("表格 {} 没有工作表", title)))?;
        store.sheet_id = first.properties.sheet_id;
        store.sheet_title = first.properties.title;

        info!(
            "打开表格: {} (id={}, 工作表={})",
            title, store.spreadsheet_id, store.sheet_title
        );
        Ok(store)
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/{}/values/{}",
            SHEETS_API,
            self.spreadsheet_id,
            urlencoding::encode(range)
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> SyncResult<reqwest::Response> {
        let token = self.auth.access_token().await?;
        let response = request.bearer_auth(token).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), &body))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> SyncResult<T> {
        let response = self.send(self.client.get(url)).await?;
        Ok(response.json().await?)
    }

    async fn batch_update(&self, requests: Vec<Value>) -> SyncResult<()> {
        let url = format!("{}/{}:batchUpdate", SHEETS_API, self.spreadsheet_id);
        self.send(self.client.post(url).json(&json!({ "requests": requests })))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SheetStore for GoogleSheetStore {
    async fn last_modified(&self) -> SyncResult<Timestamp> {
        let url = format!(
            "{}/{}?fields=modifiedTime&supportsAllDrives=true",
            DRIVE_API, self.spreadsheet_id
        );
        let meta: DriveModified = self.get_json(&url).await?;
        Ok(meta.modified_time)
    }

    async fn read_data_rows(&self) -> SyncResult<Vec<RowFields>> {
        let range = format!(
            "{}!A{}:{}",
            quote_sheet_title(&self.sheet_title),
            HEADER_ROWS + 1,
            LAST_COLUMN
        );
        let url = format!(
            "{}?majorDimension=ROWS&valueRenderOption=FORMATTED_VALUE",
            self.values_url(&range)
        );
        let values: ValueRange = self.get_json(&url).await?;

        Ok(values
            .values
            .iter()
            .map(|cells| RowFields::from_cells(cells))
            .collect())
    }

    async fn bulk_update_range(&self, start_row: usize, rows: &[RowFields]) -> SyncResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let first = grid_index(start_row) + 1;
        let last = first + rows.len() - 1;
        let range = format!(
            "{}!A{}:{}{}",
            quote_sheet_title(&self.sheet_title),
            first,
            LAST_COLUMN,
            last
        );
        let values: Vec<Vec<String>> = rows.iter().map(RowFields::to_cells).collect();
        let url = format!("{}?valueInputOption=RAW", self.values_url(&range));

        debug!("更新表格区域 {} ({} 行)", range, rows.len());
        self.send(self.client.put(url).json(&json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": values,
        })))
        .await?;
        Ok(())
    }

    async fn insert_rows_at(&self, position: usize, rows: &[RowFields]) -> SyncResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        // 插入空行和写入内容放在同一个 batchUpdate 中，由服务端整体生效
        let start = grid_index(position);
        debug!("在网格行 {} 插入 {} 行", start, rows.len());
        self.batch_update(vec![
            json!({
                "insertDimension": {
                    "range": {
                        "sheetId": self.sheet_id,
                        "dimension": "ROWS",
                        "startIndex": start,
                        "endIndex": start + rows.len(),
                    },
                    "inheritFromBefore": start > 0,
                }
            }),
            json!({
                "updateCells": {
                    "start": {
                        "sheetId": self.sheet_id,
                        "rowIndex": start,
                        "columnIndex": 0,
                    },
                    "rows": cell_rows(rows),
                    "fields": "userEnteredValue",
                }
            }),
        ])
        .await
    }

    async fn delete_rows_at(&self, position: usize, count: usize) -> SyncResult<()> {
        if count == 0 {
            return Ok(());
        }

        let start = grid_index(position);
        debug!("从网格行 {} 删除 {} 行", start, count);
        self.batch_update(vec![json!({
            "deleteDimension": {
                "range": {
                    "sheetId": self.sheet_id,
                    "dimension": "ROWS",
                    "startIndex": start,
                    "endIndex": start + count,
                }
            }
        })])
        .await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
