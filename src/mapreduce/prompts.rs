use super::task::{Language, Task};
use crate::llm::Message;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant";

/// Wrap a user prompt with the fixed system message.
pub fn chat_messages(prompt: String) -> Vec<Message> {
    vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)]
}

/// Render extracted snippets as a numbered list for inclusion in a prompt.
pub fn render_info(info: &[String]) -> String {
    if info.is_empty() {
        return "(none)".to_string();
    }
    info.iter()
        .enumerate()
        .map(|(i, text)| format!("[{}] {}", i + 1, text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn first_pass(task: Task, chunk: &str, question: &str) -> String {
    match task {
        Task::Rag => format!(
            "We are working on long-text question answering, and you are responsible for one chunk. \
            Read the following chunk and extract as much information as possible related to the question. \
            Make sure the extracted information gives clear context and is logically complete. \
            If there is no relevant information, just output \"NO INFORMATION\".\n\n\
            Your chunk:\n{chunk}\n\nQuestion: {question}\n\n"
        ),
        Task::En => format!(
            "Read the following article and extract as much information as possible related to the question.\n\n\
            {chunk}\n\nQuestion: {question}\n\n"
        ),
        Task::Zh => format!(
            "请阅读以下文章并尽可能提取与问题相关的信息。\n\n{chunk}\n\n问题：{question}\n\n"
        ),
    }
}

pub fn continuation(
    task: Task,
    iteration: u32,
    chunk: &str,
    question: &str,
    prior: &[String],
) -> String {
    let prior = render_info(prior);
    match task {
        Task::En => format!(
            "We are working on long-text question answering, and you are responsible for one chunk. \
            This is round {iteration} of Q&A, and we have the information extracted from all chunks in earlier rounds. \
            Based on the previously extracted information and the question, extract new information from the chunk. \
            Do not repeat the previously extracted information.\n\n\
            Your chunk:\n{chunk}\n\nPreviously extracted information:\n{prior}\n\nQuestion: {question}\n\n"
        ),
        Task::Zh => format!(
            "我们正在进行长文本问答任务，你负责处理其中一个文本块。这是第{iteration}轮问答。\
            我们在之前几轮已经从所有文本块中提取了信息。请基于先前提取的信息和问题，从当前文本块中提取新信息。\
            不要重复已提取的信息。\n\n\
            你的文本块：\n{chunk}\n\n先前提取的信息：\n{prior}\n\n问题：{question}\n\n"
        ),
        Task::Rag => format!(
            "We are working on long-text question answering, and you are responsible for one chunk. \
            This is round {iteration} of Q&A, and we have the information extracted from all chunks in earlier rounds. \
            Based on the previously extracted information and the question, extract new information from the chunk. \
            Do not repeat the previously extracted information. \
            If there is no new information, just output \"NO INFORMATION\".\n\n\
            Your chunk:\n{chunk}\n\nPreviously extracted information:\n{prior}\n\nQuestion: {question}"
        ),
    }
}

/// Ask for a 0-100 usefulness rating. The reply must contain `Score: <n>`.
pub fn score(language: Language, info: &str, question: &str) -> String {
    match language {
        Language::English => format!(
            "Based on the extracted information and the question, give a score (0-100) for how useful \
            the extracted information is for answering this question.\n\n\
            Extracted information: {info}\n\nQuestion: {question}\n\n\
            Please follow this format:\n\nScore: (0-100)"
        ),
        Language::Chinese => format!(
            "根据提取的信息和问题，给出一个分数（0-100），评估提取的信息对回答该问题的有用程度。\n\n\
            提取的信息：{info}\n\n问题：{question}\n\n请遵循以下格式：\n\nScore: (0-100)"
        ),
    }
}

/// Combine extracted snippets into an answer.
///
/// The final-attempt variant drops the "NO ANSWER" escape hatch.
pub fn reduce(task: Task, info: &[String], question: &str, final_attempt: bool) -> String {
    let info = render_info(info);
    match (task.language(), final_attempt) {
        (Language::English, true) => format!(
            "We have the following information extracted from different chunks of the text:\n\n{info}\n\n\
            This is the final attempt. Based on the extracted information, combine and reduce it into a \
            final answer, as short as possible, a word or phrase.\n\n\
            Question: {question}"
        ),
        (Language::English, false) => format!(
            "We have the following information extracted from different chunks of the text:\n\n{info}\n\n\
            Based on the extracted information, decide whether you can confidently answer the question. \
            If you can, combine and reduce the information into a final answer, as short as possible, a word or phrase. \
            If you cannot, just output \"NO ANSWER\".\n\n\
            Question: {question}"
        ),
        (Language::Chinese, true) => format!(
            "我们有以下从不同文本块中提取的信息：\n\n{info}\n\n\
            这是最后一次尝试。根据提取的信息，将这些信息合并并简化为最终答案。请尽量简短地回答，只使用一个或多个词语。\n\n\
            问题：{question}"
        ),
        (Language::Chinese, false) => format!(
            "我们有以下从不同文本块中提取的信息：\n\n{info}\n\n\
            根据提取的信息，请判断是否能确定地回答该问题。如果能，将这些信息合并并简化为最终答案。\
            请尽量简短地回答，只使用一个或多个词语。如果不能，直接输出\"NO ANSWER\"。\n\n\
            问题：{question}"
        ),
    }
}

pub fn condense(prediction: &str, question: &str) -> String {
    format!(
        "Please condense the following answer as much as possible, using only words or phrases, \
        and avoid repeating the question. If the answer is already short enough, keep it unchanged.\n\n\
        Question: {question}\nAnswer: {prediction}\n\n\
        You should only output the processed answer, without any other content."
    )
}
