//! Prompt construction for extraction and the three translation stages

use crate::core::client::{CompletionRequest, ModelTier};
use crate::core::config::TranslatorConfig;
use crate::core::models::{Stage, TerminologyEntry, TranslationUnit};

const EXTRACT_SYSTEM: &str = "\
<角色>你是一位计算机科学领域的术语专家，精通中英双语术语标准化翻译
<任务>从用户给出的英文原文中提取计算机专业术语，并给出中文译法
<要求>
优先参考《计算机科学技术名词》第三版
涉及编程语言术语时参照官方中文文档
新兴技术术语采用行业公认翻译
英文使用全小写单数形式
跳过“已有术语”中列出的词条
<输出>每行一个术语，格式为 英文:中文，不要输出其他内容
<示例>
text generation:文本生成
token:Token
prompt:提示词
full-stack:全栈";

const DRAFT_SYSTEM: &str = "\
<角色>你是一位专业的计算机书籍翻译专家
<任务>将用户提供的英文 Markdown 内容准确翻译为中文
<要求>
保持原文技术准确性的同时使用自然流畅的中文表达
术语对照表中的英文术语出现时，必须逐字使用表中给出的中文译法
代码、命令、路径、URL 保持原文，仅翻译注释
形如 ⟦0⟧ 的占位符代表行内代码，必须原样保留，每个恰好出现一次
处理长难句时适当拆分但保持逻辑完整
不省略任何信息，保留原文的 Markdown 格式
只输出译文";

const CRITIQUE_SYSTEM: &str = "\
<角色>你是一位严谨的技术翻译审校
<任务>对照原文审查初步翻译，列出需要修改的问题
<关注>
语法错误与不通顺的表达
未按术语对照表使用的术语
漏译、误译、多译
被破坏的 Markdown 格式
缺失或重复的 ⟦n⟧ 占位符
<输出>每行一条问题及修改建议；没有问题时只输出“无”";

const POLISH_SYSTEM: &str = "\
<角色>你是一名擅长将英文计算机技术书籍翻译为流畅中文的译者
<任务>根据审校意见润色已有翻译
<要求>
使用地道的简体中文表达，消除翻译腔
严格遵循术语对照表译法
拆分嵌套从句，减少被字句和“进行”式表达
区分验证、校验等技术动词
原文 Markdown 格式完整保留
形如 ⟦0⟧ 的占位符原样保留，每个恰好出现一次
只输出润色后的译文，不要输出改动说明";

/// Critique answers meaning "nothing to fix"
const NO_ISSUES: &[&str] = &["无", "无。", "没有问题", "none", "n/a"];

/// Render glossary entries one per line as `english: chinese`
pub fn terminology_block(entries: &[TerminologyEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{}: {}", e.english, e.chinese))
        .collect::<Vec<_>>()
        .join("\n")
}

fn with_terms(mut prompt: String, terms: &[TerminologyEntry]) -> String {
    if !terms.is_empty() {
        prompt.push_str("\n\n<术语对照表>\n");
        prompt.push_str(&terminology_block(terms));
    }
    prompt
}

pub fn extraction_request(
    text: &str,
    known: &[TerminologyEntry],
    config: &TranslatorConfig,
) -> CompletionRequest {
    let mut prompt = format!("<输入文本>\n{}", text);
    if !known.is_empty() {
        prompt.push_str("\n\n<已有术语>\n");
        prompt.push_str(&terminology_block(known));
    }
    CompletionRequest::new(Stage::Extract, ModelTier::Chat, EXTRACT_SYSTEM, prompt)
        .with_max_tokens(config.max_tokens)
        .with_temperature(config.temperature)
        .allow_empty()
}

pub fn draft_request(unit: &TranslationUnit, config: &TranslatorConfig) -> CompletionRequest {
    let prompt = with_terms(format!("<原文>\n{}", unit.source), &unit.terms);
    CompletionRequest::new(Stage::Draft, ModelTier::Chat, DRAFT_SYSTEM, prompt)
        .with_max_tokens(config.max_tokens)
        .with_temperature(config.temperature)
}

pub fn critique_request(
    unit: &TranslationUnit,
    draft: &str,
    config: &TranslatorConfig,
) -> CompletionRequest {
    let prompt = with_terms(
        format!("<原文>\n{}\n\n<初步翻译>\n{}", unit.source, draft),
        &unit.terms,
    );
    CompletionRequest::new(Stage::Critique, ModelTier::Reasoner, CRITIQUE_SYSTEM, prompt)
        .with_max_tokens(config.max_tokens)
        .allow_empty()
}

pub fn polish_request(
    unit: &TranslationUnit,
    draft: &str,
    critique: &str,
    config: &TranslatorConfig,
) -> CompletionRequest {
    let mut prompt = format!("<原文>\n{}\n\n<初步翻译>\n{}", unit.source, draft);
    if !critique.is_empty() {
        prompt.push_str("\n\n<审校意见>\n");
        prompt.push_str(critique);
    }
    let prompt = with_terms(prompt, &unit.terms);
    CompletionRequest::new(Stage::Polish, ModelTier::Reasoner, POLISH_SYSTEM, prompt)
        .with_max_tokens(config.max_tokens)
}

/// Empty string when the critique found nothing
pub fn normalize_critique(text: &str) -> String {
    let trimmed = text.trim();
    if NO_ISSUES.iter().any(|n| trimmed.eq_ignore_ascii_case(n)) {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// Strip a single outer code fence the model wrapped around its answer,
/// unless the source itself is fenced
pub fn clean_output(source: &str, output: &str) -> String {
    let trimmed = output.trim();
    if source.trim_start().starts_with("```")
        || trimmed.len() < 6
        || !trimmed.starts_with("```")
        || !trimmed.ends_with("```")
    {
        return trimmed.to_string();
    }

    let inner = &trimmed[3..trimmed.len() - 3];
    match inner.split_once('\n') {
        // first line is the info string, e.g. "markdown"
        Some((info, body)) if !info.contains('`') => body.trim().to_string(),
        _ => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{Segment, SegmentKind};

    fn unit(text: &str, terms: Vec<TerminologyEntry>) -> TranslationUnit {
        let segment = Segment::new(SegmentKind::Translatable, 0..text.len(), text);
        let mut unit = TranslationUnit::from_segment(0, &segment);
        unit.terms = terms;
        unit
    }

    #[test]
    fn test_terminology_block() {
        let block = terminology_block(&[
            TerminologyEntry::new("data structure", "数据结构"),
            TerminologyEntry::new("algorithm", "算法"),
        ]);
        assert_eq!(block, "data structure: 数据结构\nalgorithm: 算法");
    }

    #[test]
    fn test_draft_embeds_terms() {
        let config = TranslatorConfig::default();
        let u = unit(
            "An algorithm is a procedure.",
            vec![TerminologyEntry::new("algorithm", "算法")],
        );
        let request = draft_request(&u, &config);
        assert_eq!(request.stage, Stage::Draft);
        assert_eq!(request.tier, ModelTier::Chat);
        assert!(request.prompt.contains("An algorithm is a procedure."));
        assert!(request.prompt.contains("algorithm: 算法"));
        assert_eq!(request.max_tokens, 8192);
    }

    #[test]
    fn test_draft_without_terms_has_no_table() {
        let config = TranslatorConfig::default();
        let request = draft_request(&unit("Hello there.", vec![]), &config);
        assert!(!request.prompt.contains("术语对照表"));
    }

    #[test]
    fn test_critique_allows_empty_and_polish_carries_notes() {
        let config = TranslatorConfig::default();
        let u = unit("Hello there.", vec![]);
        assert!(critique_request(&u, "你好。", &config).allow_empty);

        let polish = polish_request(&u, "你好。", "语气过于生硬", &config);
        assert_eq!(polish.tier, ModelTier::Reasoner);
        assert!(polish.prompt.contains("语气过于生硬"));
        assert!(!polish_request(&u, "你好。", "", &config)
            .prompt
            .contains("审校意见"));
    }

    #[test]
    fn test_normalize_critique() {
        assert_eq!(normalize_critique(" 无 \n"), "");
        assert_eq!(normalize_critique("None"), "");
        assert_eq!(normalize_critique("术语 algorithm 应译为 算法"), "术语 algorithm 应译为 算法");
    }

    #[test]
    fn test_clean_output_unwraps_fence() {
        assert_eq!(clean_output("Hello.", "```markdown\n你好。\n```"), "你好。");
        assert_eq!(clean_output("Hello.", "  你好。\n"), "你好。");
        let fenced = "```python\nprint('hi')\n```";
        assert_eq!(clean_output(fenced, fenced), fenced);
    }
}
