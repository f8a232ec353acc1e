//! Built-in deployment roster.
//!
//! Four workers covering the repository-to-cluster path: analysis, image
//! builds, Kubernetes deployments and Terraform. Their actions are
//! simulated; configure `command` or `webhook` actions to reach real tools.

use serde_json::json;

use super::{ActionConfig, ActionKindConfig, WorkerConfig};

pub const SUPERVISOR_PROMPT: &str = "You are a supervisor agent. Your primary function is to understand the user's overall goal \
and delegate specific, well-defined tasks to specialized workers. Carefully review the user's request and the conversation history. \
If a worker is needed, choose the appropriate action and formulate a comprehensive 'task_description' for it. \
This 'task_description' MUST contain all information and context the worker requires to perform its job effectively. \
For example, if the user provided a repository URL, ensure it's included in the 'task_description' for relevant workers. \
Extract necessary details from the user's message and prior steps. Do not perform tasks yourself. \
After a worker completes its task, review the result and decide the next step: delegate another task or, \
if the overall goal is achieved, provide a final consolidated response to the user. \
If you are providing the final response, do not call any actions.";

pub const ANALYSIS_PROMPT: &str = "You are a specialized agent for analyzing code repositories. \
Describe the project's language, build system, entry points and whether a Dockerfile exists or is needed.";

pub const DOCKER_PROMPT: &str = "You are a specialized agent for building Docker images. \
Use build_docker_image once you know the project path and the desired image name.";

pub const KUBERNETES_PROMPT: &str = "You are a specialized agent for deploying applications to Kubernetes. \
Use deploy_to_kubernetes after an image has been built.";

pub const TERRAFORM_PROMPT: &str = "You are a specialized agent for managing infrastructure with Terraform. \
Generate a plan before applying it.";

/// The default worker set
pub fn builtin_workers() -> Vec<WorkerConfig> {
    vec![
        WorkerConfig {
            name: "analysis".to_string(),
            description: "Delegates a task to the repository analysis worker. The task_description MUST include \
                all necessary context from the user's request and previous steps (e.g., repository URL, \
                specific files or areas of focus)."
                .to_string(),
            system_prompt: Some(ANALYSIS_PROMPT.to_string()),
            actions: Vec::new(),
        },
        WorkerConfig {
            name: "docker".to_string(),
            description: "Delegates a task to the Docker worker (e.g., build an image). The task_description MUST \
                include the repository URL, project path within the repo, desired image name and Dockerfile \
                location if non-standard."
                .to_string(),
            system_prompt: Some(DOCKER_PROMPT.to_string()),
            actions: vec![build_docker_image()],
        },
        WorkerConfig {
            name: "kubernetes".to_string(),
            description: "Delegates a task to the Kubernetes worker (e.g., deploy an application, check service \
                status). The task_description MUST include the image name and tag, deployment name, namespace \
                and specific configurations."
                .to_string(),
            system_prompt: Some(KUBERNETES_PROMPT.to_string()),
            actions: vec![deploy_to_kubernetes()],
        },
        WorkerConfig {
            name: "terraform".to_string(),
            description: "Delegates a task to the Terraform worker (e.g., plan infrastructure changes, apply a \
                configuration). The task_description MUST include the path to the Terraform configuration, \
                specific variables and workspace."
                .to_string(),
            system_prompt: Some(TERRAFORM_PROMPT.to_string()),
            actions: vec![generate_terraform_plan(), apply_terraform_plan()],
        },
    ]
}

fn string_param(description: &str) -> serde_json::Value {
    json!({"type": "string", "description": description})
}

fn build_docker_image() -> ActionConfig {
    ActionConfig {
        name: "build_docker_image".to_string(),
        description: "Builds a Docker image for a project located at a given path. Use after analyzing a \
            repository and determining a Dockerfile exists or can be generated."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "repo_url": string_param("The original repository URL (for context)"),
                "project_path": string_param("The local file system path to the project code"),
                "image_name": string_param("The desired name for the image (e.g., myapp:latest)")
            },
            "required": ["repo_url", "project_path", "image_name"]
        }),
        kind: ActionKindConfig::Simulated {
            template: "Docker image {image_name} built successfully. Image ID: sha256:123abc456def".to_string(),
        },
    }
}

fn deploy_to_kubernetes() -> ActionConfig {
    ActionConfig {
        name: "deploy_to_kubernetes".to_string(),
        description: "Deploys a previously built Docker image to a Kubernetes cluster.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "image_name": string_param("The name and tag of the image to deploy"),
                "deployment_name": string_param("The desired name for the deployment resource"),
                "namespace": {
                    "type": "string",
                    "description": "The namespace to deploy into",
                    "default": "default"
                }
            },
            "required": ["image_name", "deployment_name"]
        }),
        kind: ActionKindConfig::Simulated {
            template: "Deployment {deployment_name} created successfully in namespace {namespace} using image {image_name}."
                .to_string(),
        },
    }
}

fn generate_terraform_plan() -> ActionConfig {
    ActionConfig {
        name: "generate_terraform_plan".to_string(),
        description: "Generates a Terraform plan to preview infrastructure modifications before applying them."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "config_details": string_param("Description of the desired infrastructure state"),
                "working_directory": string_param("The directory containing the Terraform configuration")
            },
            "required": ["config_details", "working_directory"]
        }),
        kind: ActionKindConfig::Simulated {
            template: "Terraform plan generated for {working_directory}: Plan shows 2 to add, 0 to change, 0 to destroy."
                .to_string(),
        },
    }
}

fn apply_terraform_plan() -> ActionConfig {
    ActionConfig {
        name: "apply_terraform_plan".to_string(),
        description: "Applies a generated and approved Terraform plan.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "plan_details": string_param("A description or identifier of the plan to apply"),
                "working_directory": string_param("The directory containing the Terraform configuration")
            },
            "required": ["plan_details", "working_directory"]
        }),
        kind: ActionKindConfig::Simulated {
            template: "Terraform apply successful in {working_directory}. Resources created/updated.".to_string(),
        },
    }
}
