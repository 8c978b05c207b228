//! Integration tests for the node-tree engine and the chat workflow steps.
//!
//! The chat model is replaced by an in-process fake that records the
//! messages it was sent, so thread reconstruction and trimming can be
//! checked end to end.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use threadloom::engine::{
    load_thread, propagate, store_thread, ErrorNode, ExecutionContext, Flow, Node, NodeId,
    NodeTree, Workflow, MEMORY_KEY,
};
use threadloom::error::{EngineError, ServiceError};
use threadloom::models::{Message, Role, SearchHit};
use threadloom::traits::ChatCompletion;
use threadloom::workflows::{
    CompleteThread, IncludeFiles, InjectSearchResults, SEARCH_RESULTS_KEY,
};

// ─── Fakes ──────────────────────────────────────────────────────────

/// Replies with a fixed string and keeps every thread it was sent.
struct RecordingChat {
    reply: String,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl RecordingChat {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn last_thread(&self) -> Vec<Message> {
        self.seen.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ChatCompletion for RecordingChat {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, messages: &[Message], _stream: bool) -> Result<String, ServiceError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        Ok(self.reply.clone())
    }
}

struct FailingChat;

#[async_trait]
impl ChatCompletion for FailingChat {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _: &[Message], _: bool) -> Result<String, ServiceError> {
        Err(ServiceError::Auth("HTTP 401: bad key".to_string()))
    }
}

/// Appends a user message.
struct Say(&'static str);

#[async_trait]
impl Workflow for Say {
    fn name(&self) -> &str {
        "say"
    }

    async fn run(&self, tree: &mut NodeTree, node: NodeId) -> Result<NodeId> {
        Ok(tree.add_user_message(node, self.0)?)
    }
}

fn contents(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.content.as_str()).collect()
}

fn context_with(chat: Arc<dyn ChatCompletion>) -> Arc<ExecutionContext> {
    Arc::new(ExecutionContext::disabled().with_chat(chat))
}

// ─── Tree ───────────────────────────────────────────────────────────

#[test]
fn thread_skips_nodes_without_messages() {
    let mut tree = NodeTree::new();
    let root = tree.new_root();
    let a = tree.add_user_message(root, "M1").unwrap();
    let b = tree.add_child(a, Node::named("marker")).unwrap();
    let c = tree.add_assistant_message(b, "M2").unwrap();
    let d = tree.add_user_message(c, "").unwrap();
    let e = tree.add_user_message(d, "M3").unwrap();

    let thread = tree.thread(e).unwrap();
    assert_eq!(contents(&thread), vec!["M1", "M2", "M3"]);
    assert_eq!(thread[1].role, Role::Assistant);
}

#[test]
fn sibling_branches_have_separate_threads() {
    let mut tree = NodeTree::new();
    let root = tree.new_root();
    let question = tree.add_user_message(root, "question").unwrap();
    let left = tree.add_assistant_message(question, "left answer").unwrap();
    let right = tree.add_assistant_message(question, "right answer").unwrap();

    assert_eq!(contents(&tree.thread(left).unwrap()), vec!["question", "left answer"]);
    assert_eq!(contents(&tree.thread(right).unwrap()), vec!["question", "right answer"]);
    assert_eq!(tree.children(question).count(), 2);
}

#[test]
fn initial_system_is_prepended_once() {
    let mut tree = NodeTree::new();
    let ctx = Arc::new(ExecutionContext::disabled().with_initial_system("be brief"));
    let root = tree.new_root_with(ctx);
    let a = tree.add_user_message(root, "one").unwrap();
    let b = tree.add_assistant_message(a, "two").unwrap();

    let thread = tree.thread(b).unwrap();
    assert_eq!(contents(&thread), vec!["be brief", "one", "two"]);
    assert_eq!(thread[0].role, Role::System);
}

#[test]
fn remembered_message_is_injected_before_the_node() {
    let mut tree = NodeTree::new();
    tree.remember("style", Message::system("answer in French"));
    let root = tree.new_root();
    let a = tree.add_user_message(root, "hello").unwrap();
    let b = tree
        .add_child(
            a,
            Node::named("user")
                .with_message(Message::user("what time is it?"))
                .with_data(MEMORY_KEY, "style"),
        )
        .unwrap();
    let c = tree
        .add_child(b, Node::named("dangling").with_data(MEMORY_KEY, "nothing-here"))
        .unwrap();

    let thread = tree.thread(c).unwrap();
    assert_eq!(
        contents(&thread),
        vec!["hello", "answer in French", "what time is it?"]
    );
}

#[test]
fn last_message_finds_nearest_of_role() {
    let mut tree = NodeTree::new();
    let root = tree.new_root();
    let a = tree.add_user_message(root, "first question").unwrap();
    let b = tree.add_assistant_message(a, "answer").unwrap();
    let c = tree.add_user_message(b, "second question").unwrap();

    let user = tree.last_message(c, Role::User).unwrap().unwrap();
    assert_eq!(user.content, "second question");
    let assistant = tree.last_message(c, Role::Assistant).unwrap().unwrap();
    assert_eq!(assistant.content, "answer");
    assert!(tree.last_message(c, Role::System).unwrap().is_none());
}

#[test]
fn hijack_moves_a_branch_under_the_old_parent() {
    let mut tree = NodeTree::new();
    let root = tree.new_root();
    let base = tree.add_user_message(root, "base").unwrap();
    let current = tree.add_assistant_message(base, "draft").unwrap();

    let elsewhere = tree.new_root();
    let replacement = tree.add_assistant_message(elsewhere, "final").unwrap();

    tree.hijack(current, replacement).unwrap();
    assert_eq!(tree.get(replacement).unwrap().parent(), Some(base));
    assert_eq!(contents(&tree.thread(replacement).unwrap()), vec!["base", "final"]);
    assert_eq!(tree.children(elsewhere).count(), 0);
}

#[test]
fn hijack_refuses_to_create_a_cycle() {
    let mut tree = NodeTree::new();
    let root = tree.new_root();
    let a = tree.add_user_message(root, "a").unwrap();
    let b = tree.add_user_message(a, "b").unwrap();
    let c = tree.add_user_message(b, "c").unwrap();

    let err = tree.hijack(c, a).unwrap_err();
    assert!(matches!(err, EngineError::WouldCycle { .. }));
    assert_eq!(tree.get(a).unwrap().parent(), Some(root));
}

#[test]
fn clone_node_applies_only_non_empty_overrides() {
    let mut tree = NodeTree::new();
    let root = tree.new_root();
    let template = tree
        .add_child(
            root,
            Node::named("prompt")
                .with_header("h")
                .with_message(Message::user("original"))
                .with_data("lang", "en"),
        )
        .unwrap();

    let copy = tree
        .clone_node(
            template,
            Node::default().with_message(Message::new(Role::System, "")),
            Some(root),
        )
        .unwrap();

    let node = tree.get(copy).unwrap();
    assert_eq!(node.name, "prompt");
    assert_eq!(node.header, "h");
    let message = node.message.as_ref().unwrap();
    assert_eq!(message.role, Role::System);
    assert_eq!(message.content, "original");
    assert_eq!(node.data_str("lang"), Some("en"));
    assert_eq!(node.parent(), Some(root));
}

#[test]
fn registering_a_node_twice_fails() {
    let mut tree = NodeTree::new();
    let root = tree.new_root();
    let a = tree.add_user_message(root, "a").unwrap();
    let registered = tree.get(a).unwrap().clone();

    let err = tree.add_child(root, registered).unwrap_err();
    assert!(matches!(err, EngineError::AlreadyRegistered(_)));
}

// ─── Persistence ────────────────────────────────────────────────────

#[test]
fn saved_thread_resumes_under_a_new_root() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("threads/session.json");
    let ctx = Arc::new(ExecutionContext::disabled().with_initial_system("sys"));

    let mut first = NodeTree::new();
    let root = first.new_root_with(ctx.clone());
    let a = first.add_user_message(root, "hi").unwrap();
    let b = first.add_assistant_message(a, "hello").unwrap();
    store_thread(&first, b, &path).unwrap();

    let mut second = NodeTree::new();
    let root = second.new_root_with(ctx);
    let leaf = load_thread(&mut second, root, &path).unwrap();
    assert_eq!(second.thread(leaf).unwrap(), first.thread(b).unwrap());
}

#[test]
fn loading_a_missing_thread_fails() {
    let tmp = TempDir::new().unwrap();
    let mut tree = NodeTree::new();
    let root = tree.new_root();
    assert!(load_thread(&mut tree, root, &tmp.path().join("nope.json")).is_err());
}

// ─── Flows ──────────────────────────────────────────────────────────

#[tokio::test]
async fn complete_thread_appends_the_reply() {
    let chat = RecordingChat::new("a node is a step");
    let mut tree = NodeTree::new();
    let root = tree.new_root_with(context_with(chat.clone()));

    let leaf = Flow::start(&mut tree, root)
        .apply(&Say("what is a node?"))
        .await
        .apply_error_branch(&CompleteThread::new(0, false), propagate)
        .await
        .finish()
        .unwrap();

    let reply = tree.get(leaf).unwrap().thread_message().unwrap();
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.content, "a node is a step");
    assert_eq!(contents(&chat.last_thread()), vec!["what is a node?"]);
}

#[tokio::test]
async fn complete_thread_trims_to_the_word_budget() {
    let chat = RecordingChat::new("ok");
    let mut tree = NodeTree::new();
    let root = tree.new_root_with(context_with(chat.clone()));

    Flow::start(&mut tree, root)
        .apply(&Say("one two three four five"))
        .await
        .apply(&Say("six seven"))
        .await
        .apply(&Say("eight nine"))
        .await
        .apply_error_branch(&CompleteThread::new(4, false), propagate)
        .await
        .finish()
        .unwrap();

    assert_eq!(contents(&chat.last_thread()), vec!["six seven", "eight nine"]);
}

#[tokio::test]
async fn oversized_newest_message_aborts_the_chain() {
    let chat = RecordingChat::new("unused");
    let mut tree = NodeTree::new();
    let root = tree.new_root_with(context_with(chat.clone()));

    let result = Flow::start(&mut tree, root)
        .apply(&Say("far too many words for this budget"))
        .await
        .apply_error_branch(&CompleteThread::new(2, false), propagate)
        .await
        .finish();

    assert!(result.is_err());
    assert!(chat.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn chat_failure_propagates_and_skips_later_steps() {
    let mut tree = NodeTree::new();
    let root = tree.new_root_with(context_with(Arc::new(FailingChat)));

    let result = Flow::start(&mut tree, root)
        .apply(&Say("hello"))
        .await
        .apply_error_branch(&CompleteThread::new(0, false), propagate)
        .await
        .apply(&Say("never added"))
        .await
        .finish();

    let err = result.unwrap_err();
    assert!(format!("{:#}", err).contains("authentication failed"));
    assert!(tree.iter().all(|n| n
        .thread_message()
        .map_or(true, |m| m.content != "never added")));
}

#[tokio::test]
async fn recovered_chat_failure_continues_from_the_input_node() {
    let mut tree = NodeTree::new();
    let root = tree.new_root_with(context_with(Arc::new(FailingChat)));

    let leaf = Flow::start(&mut tree, root)
        .apply(&Say("hello"))
        .await
        .apply_error_branch(&CompleteThread::new(0, false), |e: &mut ErrorNode| {
            assert!(e.is_err());
            None
        })
        .await
        .apply(&Say("try again later"))
        .await
        .finish()
        .unwrap();

    assert_eq!(
        contents(&tree.thread(leaf).unwrap()),
        vec!["hello", "try again later"]
    );
}

#[tokio::test]
async fn search_results_and_files_become_system_messages() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("notes.md"), "remember the milk").unwrap();

    let chat = RecordingChat::new("done");
    let mut tree = NodeTree::new();
    let root = tree.new_root_with(context_with(chat.clone()));
    let hits = vec![SearchHit {
        id: "1".to_string(),
        filename: "src/tree.rs".to_string(),
        split_part: "fn thread()".to_string(),
        score: 0.9,
    }];
    let with_hits = tree
        .add_child(
            root,
            Node::named("searchResults")
                .with_data(SEARCH_RESULTS_KEY, serde_json::to_value(&hits).unwrap()),
        )
        .unwrap();

    Flow::start(&mut tree, with_hits)
        .apply(&IncludeFiles::new(tmp.path(), vec!["notes.md".to_string()]))
        .await
        .apply(&InjectSearchResults)
        .await
        .apply(&Say("summarize"))
        .await
        .apply_error_branch(&CompleteThread::new(0, false), propagate)
        .await
        .finish()
        .unwrap();

    let sent = chat.last_thread();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].role, Role::System);
    assert!(sent[0].content.contains("remember the milk"));
    assert!(sent[1].content.contains("src/tree.rs"));
    assert!(sent[1].content.contains("fn thread()"));
    assert_eq!(sent[2].content, "summarize");
}

#[tokio::test]
async fn include_files_fails_on_missing_file() {
    let tmp = TempDir::new().unwrap();
    let mut tree = NodeTree::new();
    let root = tree.new_root();

    let result = Flow::start(&mut tree, root)
        .apply(&IncludeFiles::new(tmp.path(), vec!["absent.md".to_string()]))
        .await
        .finish();
    assert!(result.is_err());
}
