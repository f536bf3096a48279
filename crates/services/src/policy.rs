//! IAM-compatible policy synthesis.
//!
//! Policies are built as typed structures and serialized to the
//! 2012-10-17 JSON shape at the edge. The object store prefix-compares ARN
//! strings, so resource generation follows the documented layout exactly.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::keys::{join_prefix, workspace_key};
use crate::models::{RootType, Share, User, WorkspaceContext};

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "s3:GetBucketLocation")]
    GetBucketLocation,
    #[serde(rename = "s3:ListBucket")]
    ListBucket,
    #[serde(rename = "s3:GetObject")]
    GetObject,
    #[serde(rename = "s3:PutObject")]
    PutObject,
    #[serde(rename = "s3:DeleteObject")]
    DeleteObject,
    #[serde(rename = "s3:*")]
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// `StringLike` condition constraining a ListBucket to a prefix, with an
/// optional delimiter for single-level listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringLike {
    #[serde(rename = "s3:prefix")]
    pub prefix: String,
    #[serde(rename = "s3:delimiter", skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "StringLike")]
    pub string_like: StringLike,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "Effect")]
    pub effect: Effect,
    #[serde(rename = "Action")]
    pub actions: Vec<Action>,
    #[serde(rename = "Resource")]
    pub resources: Vec<String>,
    #[serde(rename = "Condition", skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl Statement {
    fn allow(actions: Vec<Action>, resources: Vec<String>) -> Self {
        Self {
            effect: Effect::Allow,
            actions,
            resources,
            condition: None,
        }
    }

    fn allow_list(resource: String, prefix: String, delimiter: Option<&str>) -> Self {
        Self {
            effect: Effect::Allow,
            actions: vec![Action::ListBucket],
            resources: vec![resource],
            condition: Some(Condition {
                string_like: StringLike {
                    prefix,
                    delimiter: delimiter.map(|d| d.to_string()),
                },
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Statement")]
    pub statement: Vec<Statement>,
}

fn bucket_arn(bucket: &str) -> String {
    format!("arn:aws:s3:::{bucket}")
}

fn object_arn(bucket: &str, segments: &[&str]) -> String {
    format!("{}/{}", bucket_arn(bucket), join_prefix(segments))
}

/// Build the minimal policy for one node-local constellation.
///
/// `mine` holds workspaces that are owned by the requester or live in a
/// public root; they grant at root granularity. `foreign` holds workspaces
/// reached through a share (or owner-held unmanaged workspaces, with no
/// share); they grant at workspace-prefix granularity.
pub fn synthesize(
    requester: &User,
    mine: &[WorkspaceContext],
    foreign: &[(WorkspaceContext, Option<Share>)],
) -> Result<PolicyDocument, ServiceError> {
    if mine.is_empty() && foreign.is_empty() {
        return Err(ServiceError::InvalidArgument(
            "No workspaces found".to_string(),
        ));
    }

    let mut node_id: Option<Uuid> = None;
    let mut check_node = |id: Uuid| -> Result<(), ServiceError> {
        match node_id {
            Some(existing) if existing != id => Err(ServiceError::InvalidArgument(
                "Multiple nodes found in workspace list".to_string(),
            )),
            _ => {
                node_id = Some(id);
                Ok(())
            }
        }
    };

    let mut statements: Vec<Statement> = Vec::new();
    let mut seen_roots: BTreeSet<Uuid> = BTreeSet::new();
    let mut seen_workspaces: BTreeSet<Uuid> = BTreeSet::new();

    for ctx in mine {
        check_node(ctx.node.id)?;
        if !seen_roots.insert(ctx.root.id) {
            continue;
        }
        let bucket = &ctx.root.bucket;
        let base_path = ctx.root.base_path.as_str();
        let username = requester.username.as_str();
        // The owner grant covers the whole per-user prefix, not just this
        // workspace, so look across every requested workspace in this root.
        let owns_in_root = mine
            .iter()
            .any(|c| c.root.id == ctx.root.id && c.workspace.owner_id == requester.id);

        statements.push(Statement::allow(
            vec![Action::GetBucketLocation],
            vec![bucket_arn(bucket)],
        ));

        match ctx.root.root_type {
            RootType::Public => {
                statements.push(Statement::allow_list(
                    bucket_arn(bucket),
                    join_prefix(&[base_path, "*"]),
                    Some("/"),
                ));
                statements.push(Statement::allow(
                    vec![Action::GetObject],
                    vec![object_arn(bucket, &[base_path, "*"])],
                ));
                if owns_in_root {
                    statements.push(Statement::allow(
                        vec![Action::All],
                        vec![object_arn(bucket, &[base_path, username, "*"])],
                    ));
                }
            }
            RootType::Private | RootType::Unmanaged => {
                statements.push(Statement::allow_list(
                    bucket_arn(bucket),
                    join_prefix(&[base_path, username, "*"]),
                    Some("/"),
                ));
                statements.push(Statement::allow(
                    vec![Action::All],
                    vec![object_arn(bucket, &[base_path, username, "*"])],
                ));
            }
        }
    }

    for (ctx, share) in foreign {
        check_node(ctx.node.id)?;
        if !seen_workspaces.insert(ctx.workspace.id) {
            continue;
        }
        let bucket = &ctx.root.bucket;
        let key = workspace_key(&ctx.workspace, &ctx.owner.username, &ctx.root)?;

        statements.push(Statement::allow_list(
            bucket_arn(bucket),
            key.clone(),
            Some("/"),
        ));
        statements.push(Statement::allow_list(
            bucket_arn(bucket),
            join_prefix(&[&key, "*"]),
            None,
        ));
        statements.push(Statement::allow(
            vec![Action::GetObject],
            vec![object_arn(bucket, &[&key, "*"])],
        ));

        let writable = match share {
            Some(share) => share.permission.can_write(),
            // Owner-held unmanaged workspace: the owner keeps write access
            // even though it is granted at workspace granularity.
            None => ctx.workspace.owner_id == requester.id,
        };
        if writable {
            statements.push(Statement::allow(
                vec![Action::PutObject, Action::DeleteObject],
                vec![object_arn(bucket, &[&key, "*"])],
            ));
        }
    }

    Ok(PolicyDocument {
        version: POLICY_VERSION.to_string(),
        statement: statements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SharePermission, StorageNode, Workspace, WorkspaceRoot};
    use chrono::Utc;

    fn user(name: &str) -> User {
        User {
            id: Uuid::new_v4(),
            username: name.to_string(),
            email: format!("{name}@example.com"),
            created: Utc::now(),
        }
    }

    fn node() -> StorageNode {
        StorageNode {
            id: Uuid::new_v4(),
            name: "minio".to_string(),
            api_url: "http://minio:9000".to_string(),
            sts_api_url: None,
            region: "us-east-1".to_string(),
            access_key_id: "ak".to_string(),
            secret_access_key: "sk".to_string(),
            assume_role_arn: None,
            creator_id: Uuid::new_v4(),
            created: Utc::now(),
        }
    }

    fn ctx_on(node: &StorageNode, owner: &User, root_type: RootType, name: &str) -> WorkspaceContext {
        let root = WorkspaceRoot {
            id: Uuid::new_v4(),
            root_type,
            bucket: "b".to_string(),
            base_path: String::new(),
            node_id: node.id,
            created: Utc::now(),
        };
        WorkspaceContext {
            workspace: Workspace {
                id: Uuid::new_v4(),
                name: name.to_string(),
                base_path: None,
                owner_id: owner.id,
                root_id: root.id,
                created: Utc::now(),
            },
            owner: owner.clone(),
            root,
            node: node.clone(),
        }
    }

    fn share(workspace_id: Uuid, sharee_id: Uuid, permission: SharePermission) -> Share {
        Share {
            id: Uuid::new_v4(),
            workspace_id,
            creator_id: Uuid::new_v4(),
            sharee_id,
            permission,
            expiration: None,
            created: Utc::now(),
        }
    }

    fn resources_for(doc: &PolicyDocument, action: Action) -> Vec<String> {
        doc.statement
            .iter()
            .filter(|s| s.actions.contains(&action))
            .flat_map(|s| s.resources.clone())
            .collect()
    }

    #[test]
    fn private_root_grants_only_own_prefix() {
        let alice = user("alice");
        let n = node();
        let ctx = ctx_on(&n, &alice, RootType::Private, "photos");
        let doc = synthesize(&alice, &[ctx], &[]).unwrap();

        let all = resources_for(&doc, Action::All);
        assert_eq!(all, vec!["arn:aws:s3:::b/alice/*"]);
        // No grant touches any other user's key space.
        for statement in &doc.statement {
            for resource in &statement.resources {
                assert!(!resource.contains("bob"));
            }
        }
    }

    #[test]
    fn read_share_has_get_but_no_put_or_delete() {
        let alice = user("alice");
        let bob = user("bob");
        let n = node();
        let ctx = ctx_on(&n, &alice, RootType::Private, "photos");
        let s = share(ctx.workspace.id, bob.id, SharePermission::Read);
        let doc = synthesize(&bob, &[], &[(ctx, Some(s))]).unwrap();

        assert_eq!(
            resources_for(&doc, Action::GetObject),
            vec!["arn:aws:s3:::b/alice/photos/*"]
        );
        assert!(resources_for(&doc, Action::PutObject).is_empty());
        assert!(resources_for(&doc, Action::DeleteObject).is_empty());
    }

    #[test]
    fn readwrite_share_adds_put_and_delete() {
        let alice = user("alice");
        let bob = user("bob");
        let n = node();
        let ctx = ctx_on(&n, &alice, RootType::Private, "photos");
        let s = share(ctx.workspace.id, bob.id, SharePermission::ReadWrite);
        let doc = synthesize(&bob, &[], &[(ctx, Some(s))]).unwrap();

        assert_eq!(
            resources_for(&doc, Action::PutObject),
            vec!["arn:aws:s3:::b/alice/photos/*"]
        );
    }

    #[test]
    fn owner_held_unmanaged_workspace_keeps_write_access() {
        let alice = user("alice");
        let n = node();
        let mut ctx = ctx_on(&n, &alice, RootType::Unmanaged, "import");
        ctx.root.base_path = "lake".to_string();
        ctx.workspace.base_path = Some("set1".to_string());
        let doc = synthesize(&alice, &[], &[(ctx, None)]).unwrap();

        assert_eq!(
            resources_for(&doc, Action::PutObject),
            vec!["arn:aws:s3:::b/lake/set1/*"]
        );
    }

    #[test]
    fn shared_roots_are_statemented_once() {
        let alice = user("alice");
        let n = node();
        let first = ctx_on(&n, &alice, RootType::Private, "photos");
        let mut second = ctx_on(&n, &alice, RootType::Private, "scans");
        second.root = first.root.clone();
        second.workspace.root_id = first.root.id;

        let doc = synthesize(&alice, &[first, second], &[]).unwrap();
        let locations = resources_for(&doc, Action::GetBucketLocation);
        assert_eq!(locations.len(), 1);
    }

    #[test]
    fn public_root_grants_read_for_all_and_write_for_owner() {
        let alice = user("alice");
        let n = node();
        let ctx = ctx_on(&n, &alice, RootType::Public, "photos");
        let doc = synthesize(&alice, &[ctx], &[]).unwrap();

        assert_eq!(resources_for(&doc, Action::GetObject), vec!["arn:aws:s3:::b/*"]);
        assert_eq!(resources_for(&doc, Action::All), vec!["arn:aws:s3:::b/alice/*"]);
    }

    #[test]
    fn foreign_public_workspace_grants_read_only_for_non_owner() {
        let alice = user("alice");
        let carol = user("carol");
        let n = node();
        let ctx = ctx_on(&n, &alice, RootType::Public, "photos");
        let doc = synthesize(&carol, &[ctx], &[]).unwrap();

        assert!(resources_for(&doc, Action::All).is_empty());
        assert_eq!(resources_for(&doc, Action::GetObject), vec!["arn:aws:s3:::b/*"]);
    }

    #[test]
    fn mixed_nodes_are_rejected() {
        let alice = user("alice");
        let n1 = node();
        let n2 = node();
        let a = ctx_on(&n1, &alice, RootType::Private, "photos");
        let b = ctx_on(&n2, &alice, RootType::Private, "scans");
        let err = synthesize(&alice, &[a, b], &[]).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
    }

    #[test]
    fn empty_input_is_rejected() {
        let alice = user("alice");
        assert!(matches!(
            synthesize(&alice, &[], &[]),
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn serializes_to_iam_shape() {
        let alice = user("alice");
        let n = node();
        let ctx = ctx_on(&n, &alice, RootType::Private, "photos");
        let doc = synthesize(&alice, &[ctx], &[]).unwrap();
        let value = serde_json::to_value(&doc).unwrap();

        assert_eq!(value["Version"], "2012-10-17");
        let list = value["Statement"]
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["Action"].as_array().unwrap().contains(&serde_json::json!("s3:ListBucket")))
            .unwrap();
        assert_eq!(list["Condition"]["StringLike"]["s3:prefix"], "alice/*");
        assert_eq!(list["Condition"]["StringLike"]["s3:delimiter"], "/");
    }
}
