//! Prompt templates for Flink job diagnosis and context rendering.

use crate::util::truncate_chars;
use crate::workflow::{JobInfo, RetrievedContext};

/// Cases and docs rendered into a diagnosis prompt, regardless of how many were retrieved.
pub const MAX_PROMPT_CASES: usize = 3;
pub const MAX_PROMPT_DOCS: usize = 3;

const MAX_ERROR_MESSAGE_CHARS: usize = 4000;
const MAX_JOB_CONFIG_CHARS: usize = 2000;
const MAX_CLASSIFY_INPUT_CHARS: usize = 2000;
const MAX_CASE_PATTERN_CHARS: usize = 500;
const MAX_CASE_SOLUTION_CHARS: usize = 1000;
const MAX_DOC_CONTENT_CHARS: usize = 1000;

pub const DIAGNOSIS_SYSTEM_PROMPT: &str = r#"You are an Apache Flink operations expert. You analyze failed Flink jobs, identify the root cause, and recommend concrete fixes.

Areas you cover:
1. Checkpoint failures: state backend problems, barrier alignment timeouts, checkpoint storage errors
2. Backpressure: data skew, undersized resources, slow operators
3. Deserialization errors: schema evolution, type mismatches, serializer setup
4. Out-of-memory: memory configuration, state size, inefficient data structures
5. Network problems: TaskManager connectivity, shuffle and partition failures

How to work:
- Start from the symptoms in the error message, then reason towards causes
- Take the job configuration into account
- Use the historical cases and documentation provided as reference, when relevant
- Give actionable steps, including exact configuration keys where they apply
- Judge severity and how well the evidence supports your conclusion

Return a JSON object with these fields:
- root_cause: one or two sentences
- detailed_analysis: your reasoning
- suggested_fix: concrete repair steps
- priority: "high", "medium" or "low"
- confidence: number between 0 and 1
- related_docs: list of relevant documentation URLs

Answer in the language of the error message."#;

pub const ERROR_TYPE_LABELS: &str = r#"checkpoint_failure - checkpoint related failures
backpressure - backpressure problems
deserialization_error - deserialization failures
oom - out of memory
network - network related problems
other - anything else"#;

/// Prompt asking the model for a single error label.
pub fn classification_prompt(error_message: &str) -> String {
    format!(
        "Classify the following Flink error message.\n\nError message:\n```\n{}\n```\n\nAllowed types:\n{}\n\nReply with the type name only.",
        truncate_chars(error_message, MAX_CLASSIFY_INPUT_CHARS),
        ERROR_TYPE_LABELS
    )
}

/// User prompt for the structured diagnosis.
pub fn diagnosis_user_prompt(job: &JobInfo, context: Option<&RetrievedContext>) -> String {
    let job_config = job
        .job_config
        .as_ref()
        .and_then(|c| serde_json::to_string_pretty(c).ok())
        .unwrap_or_else(|| "{}".to_string());

    format!(
        r#"Diagnose the following Flink job failure.

## Job
- Job ID: {job_id}
- Job Name: {job_name}
- Job Type: {job_type}
- Error Type: {error_type}

## Error Message
```
{error_message}
```

## Job Configuration
```json
{job_config}
```

## Reference Context
{context}

Analyze the information above and return the structured diagnosis."#,
        job_id = job.job_id,
        job_name = job.job_name.as_deref().unwrap_or("Unknown"),
        job_type = job.job_type.as_deref().unwrap_or("Unknown"),
        error_type = job.error_type.as_deref().unwrap_or("Unknown"),
        error_message = truncate_chars(&job.error_message, MAX_ERROR_MESSAGE_CHARS),
        job_config = truncate_chars(&job_config, MAX_JOB_CONFIG_CHARS),
        context = render_context(context),
    )
}

/// Render retrieved cases and docs, bounded in count and field length.
pub fn render_context(context: Option<&RetrievedContext>) -> String {
    let Some(context) = context else {
        return "No reference context available.".to_string();
    };

    let cases_section = if context.similar_cases.is_empty() {
        "No similar historical cases found.".to_string()
    } else {
        context
            .similar_cases
            .iter()
            .take(MAX_PROMPT_CASES)
            .enumerate()
            .map(|(i, case)| {
                format!(
                    "\n### Case {}: {}\nError Pattern: {}\nRoot Cause: {}\nSolution: {}\n",
                    i + 1,
                    case.error_type,
                    truncate_chars(&case.error_pattern, MAX_CASE_PATTERN_CHARS),
                    case.root_cause,
                    truncate_chars(&case.solution, MAX_CASE_SOLUTION_CHARS),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let docs_section = if context.doc_snippets.is_empty() {
        "No related documentation found.".to_string()
    } else {
        context
            .doc_snippets
            .iter()
            .take(MAX_PROMPT_DOCS)
            .enumerate()
            .map(|(i, doc)| {
                format!(
                    "\n### Document {}: {}\n{}\nSource: {}\n",
                    i + 1,
                    doc.title,
                    truncate_chars(&doc.content, MAX_DOC_CONTENT_CHARS),
                    doc.doc_url.as_deref().unwrap_or("N/A"),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "\n## Similar Historical Cases\n{}\n\n## Related Flink Documentation\n{}\n",
        cases_section, docs_section
    )
}

/// JSON schema passed as `response_format` so the reply parses into a diagnosis.
pub fn diagnosis_response_format() -> serde_json::Value {
    serde_json::json!({
        "type": "json_schema",
        "json_schema": {
            "name": "flink_diagnosis",
            "strict": true,
            "schema": {
                "type": "object",
                "additionalProperties": false,
                "required": [
                    "root_cause",
                    "detailed_analysis",
                    "suggested_fix",
                    "priority",
                    "confidence",
                    "related_docs"
                ],
                "properties": {
                    "root_cause": { "type": "string" },
                    "detailed_analysis": { "type": "string" },
                    "suggested_fix": { "type": "string" },
                    "priority": { "type": "string", "enum": ["high", "medium", "low"] },
                    "confidence": { "type": "number" },
                    "related_docs": { "type": "array", "items": { "type": "string" } }
                }
            }
        }
    })
}
