// ABOUTME: Python snippets that load uploaded tables and expose them to user code
// ABOUTME: Builds the data-load snippet, the per-run preamble and parses the load metadata

use serde::{Deserialize, Serialize};

/// Pickle holding every uploaded table merged into one frame
pub const MASTER_PICKLE: &str = "df_master.pkl";

/// JSON file listing per-file row and column metadata
pub const FILES_META: &str = "files_meta.json";

const DATA_LOAD_TEMPLATE: &str = r#"
import json
import os
import pandas as pd

upload_dir = __UPLOAD_DIR__
files = __FILES__
dfs = []
file_info = []

for name in files:
    path = os.path.join(upload_dir, name)
    if name.endswith('.xlsx') or name.endswith('.xls'):
        df = pd.read_excel(path)
    else:
        df = pd.read_csv(path)

    df.to_pickle(path + '.pkl')
    file_info.append({
        "name": name,
        "rows": len(df),
        "columns": [str(c) for c in df.columns],
    })

    df['_source_file'] = name
    dfs.append(df)

df_master = pd.concat(dfs, ignore_index=True) if dfs else pd.DataFrame()
df_master.to_pickle(os.path.join(upload_dir, 'df_master.pkl'))

with open(os.path.join(upload_dir, 'files_meta.json'), 'w') as f:
    json.dump(file_info, f)

print(json.dumps({
    "total_rows": len(df_master),
    "columns": [str(c) for c in df_master.columns],
    "files": file_info,
}))
"#;

const TABLE_PREAMBLE_TEMPLATE: &str = r#"
import os
import re
import pandas as pd

_upload_dir = __UPLOAD_DIR__
_master_path = os.path.join(_upload_dir, 'df_master.pkl')
if os.path.exists(_master_path):
    df_master = pd.read_pickle(_master_path)
else:
    df_master = pd.DataFrame()

for _pkl in os.listdir(_upload_dir):
    if _pkl.endswith('.pkl') and _pkl != 'df_master.pkl':
        _var = 'df_' + re.sub(r'[^a-zA-Z0-9]', '_', _pkl[:-4])
        try:
            globals()[_var] = pd.read_pickle(os.path.join(_upload_dir, _pkl))
        except Exception:
            pass
"#;

/// Row and column summary of one uploaded file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub rows: u64,
    pub columns: Vec<String>,
}

/// Summary printed by the data-load snippet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataMetadata {
    pub total_rows: u64,
    pub columns: Vec<String>,
    pub files: Vec<FileMetadata>,
}

/// Python string literal for `value`; JSON string escapes are valid Python
pub(crate) fn python_literal<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "None".to_string())
}

/// Snippet reading every uploaded file into `df_master` and per-file pickles
pub fn data_load_snippet(upload_dir: &str, filenames: &[String]) -> String {
    DATA_LOAD_TEMPLATE
        .replace("__UPLOAD_DIR__", &python_literal(upload_dir))
        .replace("__FILES__", &python_literal(filenames))
}

/// Prefix user code with the loader for `df_master` and `df_<file>` tables
///
/// `2023.xlsx` becomes `df_2023_xlsx`.
pub fn wrap_with_tables(upload_dir: &str, code: &str) -> String {
    let preamble = TABLE_PREAMBLE_TEMPLATE.replace("__UPLOAD_DIR__", &python_literal(upload_dir));
    format!("{}\n{}\n", preamble, code)
}

/// Remote files derived from an upload that must survive reconnection
pub fn derived_files(upload_dir: &str, filenames: &[String]) -> Vec<String> {
    let dir = upload_dir.trim_end_matches('/');
    let mut paths = vec![
        format!("{}/{}", dir, MASTER_PICKLE),
        format!("{}/{}", dir, FILES_META),
    ];
    paths.extend(filenames.iter().map(|name| format!("{}/{}.pkl", dir, name)));
    paths
}

/// Parse the last JSON object line of the load output
pub fn parse_metadata(output: &str) -> DataMetadata {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| line.starts_with('{'))
        .and_then(|line| serde_json::from_str(line).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_data_load_snippet_embeds_quoted_names() {
        let files = vec!["a.csv".to_string(), "it's.xlsx".to_string()];
        let snippet = data_load_snippet("/home/user", &files);

        assert!(snippet.contains(r#"upload_dir = "/home/user""#));
        assert!(snippet.contains(r#"files = ["a.csv","it's.xlsx"]"#));
        assert!(!snippet.contains("__FILES__"));
    }

    #[test]
    fn test_wrap_with_tables_puts_code_last() {
        let wrapped = wrap_with_tables("/home/user", "print(len(df_master))");
        assert!(wrapped.contains("df_master = pd.read_pickle(_master_path)"));
        assert!(wrapped.trim_end().ends_with("print(len(df_master))"));
    }

    #[test]
    fn test_derived_files() {
        let files = vec!["a.csv".to_string()];
        assert_eq!(
            derived_files("/home/user/", &files),
            vec![
                "/home/user/df_master.pkl".to_string(),
                "/home/user/files_meta.json".to_string(),
                "/home/user/a.csv.pkl".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_metadata_uses_last_json_line() {
        let output = "Reading files\n{\"total_rows\": 15, \"columns\": [\"id\", \"_source_file\"], \"files\": [{\"name\": \"a.csv\", \"rows\": 10, \"columns\": [\"id\"]}]}";
        let metadata = parse_metadata(output);

        assert_eq!(metadata.total_rows, 15);
        assert_eq!(metadata.columns, vec!["id", "_source_file"]);
        assert_eq!(
            metadata.files,
            vec![FileMetadata {
                name: "a.csv".to_string(),
                rows: 10,
                columns: vec!["id".to_string()],
            }]
        );
    }

    #[test]
    fn test_parse_metadata_falls_back_to_empty() {
        assert_eq!(parse_metadata("no json here"), DataMetadata::default());
        assert_eq!(parse_metadata("{not json"), DataMetadata::default());
    }
}
